// Keyswap Core Library
// Layout-aware global key swapping: rules, layout table, event filter engine

pub mod engine;
pub mod headless;
pub mod input;
pub mod key;
pub mod layout;
pub mod permission;
pub mod platform;
pub mod remapper;
pub mod rules;
pub mod settings;

pub use engine::{
    Disposition, EngineState, EngineStatus, InstalledTap, NoTap, RemapEngine, RemapFilter,
    TapBackend, TapControl, TapError,
};
pub use input::{keyboard_label, EventKind, EventMask, KeyEvent, KeyboardType, SyntheticEvent};
pub use key::KeyCode;
pub use layout::{
    LayoutChangeWatcher, LayoutError, LayoutMap, LayoutNotifier, LayoutSource, LayoutTable,
};
pub use permission::{PermissionGate, TrustProvider};
pub use remapper::{Collaborators, KeyRemapper, PendingWork};
pub use rules::{
    FileStore, KeySwapRule, KeyValueStore, MemoryStore, RuleError, RuleId, RuleStore, StorageError,
};
pub use settings::{default_settings_content, Settings, SettingsError};
