// Keyswap Layout Table
// Keycode <-> character mapping for the active layout, rebuilt on layout changes

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::key::{normalize_layout_output, KeyCode, SCAN_RANGE, SCAN_SIZE};
use crate::layout::{LayoutError, LayoutSource};

/// One immutable generation of the layout mapping.
///
/// Readers take an `Arc` to a whole generation, so the two directions are
/// always consistent with each other even while a rebuild is in flight.
#[derive(Debug, Clone)]
pub struct LayoutMap {
    by_code: [Option<char>; SCAN_SIZE],
    by_char: HashMap<char, KeyCode>,
    generation: u64,
}

impl LayoutMap {
    /// A table with no mappings
    pub fn empty() -> Self {
        Self {
            by_code: [None; SCAN_SIZE],
            by_char: HashMap::new(),
            generation: 0,
        }
    }

    /// Character produced by a key code, if it is a letter or digit
    pub fn character(&self, code: KeyCode) -> Option<char> {
        code.scan_index().and_then(|idx| self.by_code[idx])
    }

    /// Key code that produces a character
    pub fn key_code(&self, c: char) -> Option<KeyCode> {
        self.by_char.get(&c).copied()
    }

    /// Number of key codes producing a letter or digit
    pub fn len(&self) -> usize {
        self.by_code.iter().filter(|c| c.is_some()).count()
    }

    /// Check if no key code produced a letter or digit
    pub fn is_empty(&self) -> bool {
        self.by_char.is_empty()
    }

    /// Rebuild counter this map was produced by (0 = never built)
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Producible characters, sorted
    pub fn characters(&self) -> Vec<char> {
        let mut chars: Vec<char> = self.by_char.keys().copied().collect();
        chars.sort_unstable();
        chars
    }

    /// All (key code, character) pairs in key code order
    pub fn entries(&self) -> Vec<(KeyCode, char)> {
        self.by_code
            .iter()
            .enumerate()
            .filter_map(|(idx, c)| c.map(|c| (KeyCode(idx as u16), c)))
            .collect()
    }
}

/// Layout-aware character <-> key code table.
///
/// Written on the main context when the layout changes, read on the filter
/// callback for every keystroke. A rebuild assembles a complete new
/// [`LayoutMap`] before swapping it in under a short write lock.
pub struct LayoutTable {
    source: Arc<dyn LayoutSource>,
    current: RwLock<Arc<LayoutMap>>,
    rebuilds: AtomicU64,
}

impl LayoutTable {
    /// Create an empty table. Call [`LayoutTable::rebuild`] to populate it.
    pub fn new(source: Arc<dyn LayoutSource>) -> Self {
        Self {
            source,
            current: RwLock::new(Arc::new(LayoutMap::empty())),
            rebuilds: AtomicU64::new(0),
        }
    }

    /// Re-derive the table from the active layout.
    ///
    /// On failure the previous generation stays in place and the error is
    /// logged; lookups never regress to "not found" because of a failed query.
    /// Returns the number of key codes mapped.
    pub fn rebuild(&self) -> Result<usize, LayoutError> {
        let translator = match self.source.load() {
            Ok(translator) => translator,
            Err(e) => {
                log::warn!("Keeping previous layout table: {}", e);
                return Err(e);
            }
        };

        let mut next = LayoutMap::empty();
        for raw in SCAN_RANGE {
            let code = KeyCode(raw);
            let Some(output) = translator.translate(code) else {
                continue;
            };
            let Some(c) = normalize_layout_output(&output) else {
                continue;
            };
            next.by_code[raw as usize] = Some(c);
            // First key code wins when a layout produces a character twice
            next.by_char.entry(c).or_insert(code);
        }
        drop(translator);

        next.generation = self.rebuilds.fetch_add(1, Ordering::Relaxed) + 1;
        let mapped = next.len();
        log::debug!(
            "Layout table generation {}: {} keys, {} characters",
            next.generation,
            mapped,
            next.by_char.len()
        );

        *self.current.write() = Arc::new(next);
        Ok(mapped)
    }

    /// Current generation. Cheap: one atomic increment, no allocation.
    pub fn snapshot(&self) -> Arc<LayoutMap> {
        self.current.read().clone()
    }

    /// Character produced by a key code under the current layout
    pub fn character(&self, code: KeyCode) -> Option<char> {
        self.current.read().character(code)
    }

    /// Key code producing a character under the current layout
    pub fn key_code(&self, c: char) -> Option<KeyCode> {
        self.current.read().key_code(c)
    }

    /// Producible characters, sorted
    pub fn supported_characters(&self) -> Vec<char> {
        self.current.read().characters()
    }

    /// Generation counter of the current table
    pub fn generation(&self) -> u64 {
        self.current.read().generation()
    }
}

impl std::fmt::Debug for LayoutTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.current.read();
        f.debug_struct("LayoutTable")
            .field("generation", &current.generation())
            .field("keys", &current.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::StaticLayout;

    fn table_with(pairs: &[(u16, &str)]) -> (Arc<StaticLayout>, LayoutTable) {
        let source = Arc::new(StaticLayout::from_pairs(pairs));
        let table = LayoutTable::new(source.clone());
        table.rebuild().unwrap();
        (source, table)
    }

    #[test]
    fn test_empty_before_rebuild() {
        let table = LayoutTable::new(Arc::new(StaticLayout::us_ansi()));
        assert_eq!(table.character(KeyCode(0)), None);
        assert_eq!(table.generation(), 0);
    }

    #[test]
    fn test_rebuild_maps_both_directions() {
        let (_, table) = table_with(&[(0, "a"), (1, "b")]);
        assert_eq!(table.character(KeyCode(0)), Some('a'));
        assert_eq!(table.character(KeyCode(1)), Some('b'));
        assert_eq!(table.key_code('a'), Some(KeyCode(0)));
        assert_eq!(table.key_code('b'), Some(KeyCode(1)));
        assert_eq!(table.key_code('c'), None);
        assert_eq!(table.generation(), 1);
    }

    #[test]
    fn test_rebuild_filters_non_alphanumeric() {
        let (_, table) = table_with(&[(0, "a"), (24, "="), (33, "´"), (49, " "), (5, "xy")]);
        assert_eq!(table.snapshot().len(), 1);
        assert_eq!(table.character(KeyCode(24)), None);
        assert_eq!(table.character(KeyCode(33)), None);
        assert_eq!(table.character(KeyCode(5)), None);
    }

    #[test]
    fn test_rebuild_skips_numeric_symbols() {
        // French PC layouts put a superscript two left of the digit row
        let (_, table) = table_with(&[(10, "²"), (0, "a"), (18, "1")]);
        assert_eq!(table.character(KeyCode(10)), None);
        assert_eq!(table.supported_characters(), vec!['1', 'a']);
    }

    #[test]
    fn test_rebuild_lowercases() {
        let (_, table) = table_with(&[(0, "A")]);
        assert_eq!(table.character(KeyCode(0)), Some('a'));
        assert_eq!(table.key_code('a'), Some(KeyCode(0)));
    }

    #[test]
    fn test_first_keycode_wins_for_duplicates() {
        let (_, table) = table_with(&[(10, "a"), (0, "a")]);
        // Scan order is ascending, so code 0 is observed first
        assert_eq!(table.key_code('a'), Some(KeyCode(0)));
        assert_eq!(table.character(KeyCode(10)), Some('a'));
    }

    #[test]
    fn test_codes_outside_scan_range_ignored() {
        let (_, table) = table_with(&[(128, "a"), (200, "b")]);
        assert!(table.snapshot().is_empty());
        assert_eq!(table.character(KeyCode(200)), None);
    }

    #[test]
    fn test_failed_rebuild_keeps_previous_table() {
        let (source, table) = table_with(&[(0, "a"), (1, "b")]);
        source.set_available(false);

        assert!(matches!(table.rebuild(), Err(LayoutError::Unavailable(_))));
        assert_eq!(table.character(KeyCode(0)), Some('a'));
        assert_eq!(table.key_code('b'), Some(KeyCode(1)));
        assert_eq!(table.generation(), 1);
    }

    #[test]
    fn test_rebuild_picks_up_layout_change() {
        let (source, table) = table_with(&[(0, "a"), (12, "q")]);
        // QWERTY -> AZERTY swaps the A and Q positions
        source.replace(&[(0, "q"), (12, "a")]);
        table.rebuild().unwrap();

        assert_eq!(table.character(KeyCode(0)), Some('q'));
        assert_eq!(table.key_code('a'), Some(KeyCode(12)));
        assert_eq!(table.generation(), 2);
    }

    #[test]
    fn test_snapshot_survives_rebuild() {
        let (source, table) = table_with(&[(0, "a")]);
        let old = table.snapshot();
        source.replace(&[(0, "z")]);
        table.rebuild().unwrap();

        assert_eq!(old.character(KeyCode(0)), Some('a'));
        assert_eq!(table.character(KeyCode(0)), Some('z'));
    }

    #[test]
    fn test_us_ansi_letters_and_digits() {
        let table = LayoutTable::new(Arc::new(StaticLayout::us_ansi()));
        let mapped = table.rebuild().unwrap();

        assert_eq!(mapped, 36);
        assert_eq!(table.supported_characters().len(), 36);
        assert_eq!(table.key_code('f'), Some(KeyCode(3)));
        assert_eq!(table.key_code('g'), Some(KeyCode(5)));
        assert_eq!(table.key_code('0'), Some(KeyCode(29)));
    }
}
