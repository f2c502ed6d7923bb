// Keyswap Layout Source
// Seam between the layout table and the OS keyboard-layout query API

use crate::key::KeyCode;

/// Errors from querying the active keyboard layout
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("keyboard layout data unavailable: {0}")]
    Unavailable(String),

    #[error("layout change subscription failed: {0}")]
    Subscribe(String),
}

/// Translates key codes under one fixed layout.
///
/// A translator is obtained once per rebuild, so every code in a scan sees
/// the same layout data.
pub trait KeyTranslator {
    /// Characters produced by pressing `code` with no modifiers and dead keys
    /// suppressed. `None` or an empty string means the key produces nothing.
    fn translate(&self, code: KeyCode) -> Option<String>;
}

/// Provider of the active keyboard layout
pub trait LayoutSource: Send + Sync {
    /// Load the layout that is active right now.
    ///
    /// Fails with [`LayoutError::Unavailable`] if the OS returns no layout data.
    fn load(&self) -> Result<Box<dyn KeyTranslator + '_>, LayoutError>;
}
