// Keyswap Input Layer - Key Event Model
// Event categories delivered to the filter and the mutable event surface it rewrites

use crate::input::KeyboardType;
use crate::key::KeyCode;

/// Raw CoreGraphics event type numbers
pub mod raw {
    pub const KEY_DOWN: u32 = 10;
    pub const KEY_UP: u32 = 11;
    pub const FLAGS_CHANGED: u32 = 12;
    pub const TAP_DISABLED_BY_TIMEOUT: u32 = 0xFFFF_FFFE;
    pub const TAP_DISABLED_BY_USER_INPUT: u32 = 0xFFFF_FFFF;
}

/// Category of an event delivered to the key filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum EventKind {
    #[strum(serialize = "key-down")]
    KeyDown,
    #[strum(serialize = "key-up")]
    KeyUp,
    #[strum(serialize = "flags-changed")]
    FlagsChanged,
    /// The OS switched the filter off because a callback took too long
    #[strum(serialize = "tap-disabled-by-timeout")]
    TapDisabledByTimeout,
    /// The OS switched the filter off because of secure input
    #[strum(serialize = "tap-disabled-by-user-input")]
    TapDisabledByUserInput,
    #[strum(serialize = "other")]
    Other(u32),
}

impl EventKind {
    /// Map a raw event type number to its category
    pub fn from_raw(value: u32) -> Self {
        match value {
            raw::KEY_DOWN => EventKind::KeyDown,
            raw::KEY_UP => EventKind::KeyUp,
            raw::FLAGS_CHANGED => EventKind::FlagsChanged,
            raw::TAP_DISABLED_BY_TIMEOUT => EventKind::TapDisabledByTimeout,
            raw::TAP_DISABLED_BY_USER_INPUT => EventKind::TapDisabledByUserInput,
            other => EventKind::Other(other),
        }
    }

    /// Raw event type number
    pub fn to_raw(self) -> u32 {
        match self {
            EventKind::KeyDown => raw::KEY_DOWN,
            EventKind::KeyUp => raw::KEY_UP,
            EventKind::FlagsChanged => raw::FLAGS_CHANGED,
            EventKind::TapDisabledByTimeout => raw::TAP_DISABLED_BY_TIMEOUT,
            EventKind::TapDisabledByUserInput => raw::TAP_DISABLED_BY_USER_INPUT,
            EventKind::Other(value) => value,
        }
    }

    /// Returns true for key-down and key-up
    pub fn is_key(self) -> bool {
        matches!(self, EventKind::KeyDown | EventKind::KeyUp)
    }

    /// Returns true if the OS is reporting that it switched the filter off
    pub fn is_tap_disabled(self) -> bool {
        matches!(
            self,
            EventKind::TapDisabledByTimeout | EventKind::TapDisabledByUserInput
        )
    }
}

/// Bit set of event categories a filter registers interest in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventMask(u64);

impl EventMask {
    /// Key-down and key-up only
    pub const KEYS: EventMask =
        EventMask((1 << raw::KEY_DOWN) | (1 << raw::KEY_UP));

    /// Raw bit value as passed to the OS
    pub fn bits(self) -> u64 {
        self.0
    }

    /// Whether events of this kind are delivered under the mask
    pub fn contains(self, kind: EventKind) -> bool {
        let raw = kind.to_raw();
        raw < 64 && self.0 & (1 << raw) != 0
    }
}

/// The mutable view of one intercepted event.
///
/// Implemented by the OS event wrapper on macOS and by [`SyntheticEvent`]
/// everywhere else. All methods must be cheap: they run inside the filter
/// callback for every keystroke on the machine.
pub trait KeyEvent {
    /// Event category
    fn kind(&self) -> EventKind;

    /// Physical key code of the event
    fn key_code(&self) -> KeyCode;

    /// Overwrite the key code in place
    fn set_key_code(&mut self, code: KeyCode);

    /// Hardware class of the keyboard that produced the event
    fn keyboard_type(&self) -> KeyboardType;
}

/// In-memory event used by tests and headless runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticEvent {
    pub kind: EventKind,
    pub key_code: KeyCode,
    pub keyboard_type: KeyboardType,
}

impl SyntheticEvent {
    /// Create a key-down event
    pub fn key_down(code: u16, keyboard_type: i64) -> Self {
        Self {
            kind: EventKind::KeyDown,
            key_code: KeyCode(code),
            keyboard_type: KeyboardType(keyboard_type),
        }
    }

    /// Create a key-up event
    pub fn key_up(code: u16, keyboard_type: i64) -> Self {
        Self {
            kind: EventKind::KeyUp,
            ..Self::key_down(code, keyboard_type)
        }
    }

    /// Create an event of an arbitrary kind
    pub fn of_kind(kind: EventKind, code: u16, keyboard_type: i64) -> Self {
        Self {
            kind,
            ..Self::key_down(code, keyboard_type)
        }
    }
}

impl KeyEvent for SyntheticEvent {
    fn kind(&self) -> EventKind {
        self.kind
    }

    fn key_code(&self) -> KeyCode {
        self.key_code
    }

    fn set_key_code(&mut self, code: KeyCode) {
        self.key_code = code;
    }

    fn keyboard_type(&self) -> KeyboardType {
        self.keyboard_type
    }
}
