// Keyswap Key Codes
// Physical key positions and the character normalization shared by rules and layouts

use std::fmt;
use std::ops::RangeInclusive;

/// Key codes scanned when deriving a layout table.
///
/// Virtual key codes above 127 are function/media keys on every Apple
/// keyboard, so they never produce letters or digits.
pub const SCAN_RANGE: RangeInclusive<u16> = 0..=127;

/// Number of slots in a keycode-indexed table.
pub const SCAN_SIZE: usize = 128;

/// Represents a single physical key position.
///
/// This is a newtype wrapper around u16 for type safety.
/// The numeric values are macOS virtual key codes, which identify the
/// key's position and are independent of the active layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct KeyCode(pub u16);

impl KeyCode {
    /// Get the raw numeric code value
    pub fn code(self) -> u16 {
        self.0
    }

    /// Slot index in a scan-range table, if the code falls inside it
    pub fn scan_index(self) -> Option<usize> {
        let idx = self.0 as usize;
        (idx < SCAN_SIZE).then_some(idx)
    }

    /// Position name on an ANSI keyboard, for logs and listings
    pub fn ansi_name(self) -> &'static str {
        ansi_position_name(self.0)
    }
}

impl From<u16> for KeyCode {
    fn from(code: u16) -> Self {
        KeyCode(code)
    }
}

impl From<KeyCode> for u16 {
    fn from(key: KeyCode) -> Self {
        key.0
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.ansi_name())
    }
}

/// Normalize a user-supplied key string to the single character a rule stores.
///
/// The input is lowercased and stripped of anything that is not a letter or
/// digit. Exactly one character must remain, otherwise `None`.
pub fn normalize_character(input: &str) -> Option<char> {
    let mut chars = input
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|&c| is_letter_or_digit(c));
    let first = chars.next()?;
    match chars.next() {
        Some(_) => None,
        None => Some(first),
    }
}

/// Normalize a layout translation result.
///
/// Unlike [`normalize_character`] nothing is filtered: the translation must be
/// exactly one letter or digit, which is then lowercased. Dead keys,
/// punctuation and multi-character outputs are rejected.
pub fn normalize_layout_output(output: &str) -> Option<char> {
    let mut chars = output.chars();
    let c = chars.next()?;
    if chars.next().is_some() || !is_letter_or_digit(c) {
        return None;
    }
    let mut lower = c.to_lowercase();
    let l = lower.next()?;
    if lower.next().is_some() {
        return None;
    }
    Some(l)
}

/// A letter or a decimal digit.
///
/// Superscripts, fractions and other numeric symbols are not digits here.
pub fn is_letter_or_digit(c: char) -> bool {
    c.is_alphabetic() || c.is_ascii_digit()
}

/// Whether a character is allowed as one side of a swap rule
pub fn is_swappable(c: char) -> bool {
    is_letter_or_digit(c) && c.to_lowercase().eq(std::iter::once(c))
}

fn ansi_position_name(code: u16) -> &'static str {
    match code {
        0 => "A",
        1 => "S",
        2 => "D",
        3 => "F",
        4 => "H",
        5 => "G",
        6 => "Z",
        7 => "X",
        8 => "C",
        9 => "V",
        10 => "ISO_SECTION",
        11 => "B",
        12 => "Q",
        13 => "W",
        14 => "E",
        15 => "R",
        16 => "Y",
        17 => "T",
        18 => "1",
        19 => "2",
        20 => "3",
        21 => "4",
        22 => "6",
        23 => "5",
        24 => "EQUAL",
        25 => "9",
        26 => "7",
        27 => "MINUS",
        28 => "8",
        29 => "0",
        30 => "RIGHT_BRACKET",
        31 => "O",
        32 => "U",
        33 => "LEFT_BRACKET",
        34 => "I",
        35 => "P",
        36 => "RETURN",
        37 => "L",
        38 => "J",
        39 => "QUOTE",
        40 => "K",
        41 => "SEMICOLON",
        42 => "BACKSLASH",
        43 => "COMMA",
        44 => "SLASH",
        45 => "N",
        46 => "M",
        47 => "PERIOD",
        48 => "TAB",
        49 => "SPACE",
        50 => "GRAVE",
        51 => "DELETE",
        53 => "ESCAPE",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_character_lowercases() {
        assert_eq!(normalize_character("A"), Some('a'));
        assert_eq!(normalize_character("7"), Some('7'));
        assert_eq!(normalize_character("ß"), Some('ß'));
    }

    #[test]
    fn test_normalize_character_strips_noise() {
        assert_eq!(normalize_character(" f "), Some('f'));
        assert_eq!(normalize_character("-g-"), Some('g'));
    }

    #[test]
    fn test_normalize_character_rejects() {
        assert_eq!(normalize_character(""), None);
        assert_eq!(normalize_character(";"), None);
        assert_eq!(normalize_character("ab"), None);
    }

    #[test]
    fn test_numeric_symbols_are_not_digits() {
        assert_eq!(normalize_layout_output("²"), None);
        assert_eq!(normalize_layout_output("½"), None);
        assert_eq!(normalize_character("½"), None);
        assert_eq!(normalize_character("²a"), Some('a'));
        assert!(!is_swappable('²'));
        assert!(is_swappable('9'));
    }

    #[test]
    fn test_normalize_layout_output() {
        assert_eq!(normalize_layout_output("Q"), Some('q'));
        assert_eq!(normalize_layout_output("é"), Some('é'));
        assert_eq!(normalize_layout_output("3"), Some('3'));
        assert_eq!(normalize_layout_output(""), None);
        assert_eq!(normalize_layout_output(" "), None);
        assert_eq!(normalize_layout_output(";"), None);
        assert_eq!(normalize_layout_output("´"), None); // dead acute
        assert_eq!(normalize_layout_output("ab"), None);
    }

    #[test]
    fn test_scan_index() {
        assert_eq!(KeyCode(0).scan_index(), Some(0));
        assert_eq!(KeyCode(127).scan_index(), Some(127));
        assert_eq!(KeyCode(128).scan_index(), None);
    }

    #[test]
    fn test_is_swappable() {
        assert!(is_swappable('a'));
        assert!(is_swappable('5'));
        assert!(!is_swappable('A'));
        assert!(!is_swappable('-'));
    }

    #[test]
    fn test_key_display() {
        assert_eq!(KeyCode(0).to_string(), "0 (A)");
        assert_eq!(KeyCode(200).to_string(), "200 (UNKNOWN)");
    }
}
