// Keyswap Event Tap Seam
// How the engine asks the OS for a global key event filter

use std::sync::Arc;

use crate::engine::RemapFilter;
use crate::input::EventMask;

/// Failures installing or keeping the global event filter.
///
/// The display text is what the UI shows as the last start error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TapError {
    #[error("Enable Accessibility permission for key remapping.")]
    PermissionDenied,

    #[error("Unable to start key remapping event tap: {0}")]
    CreateFailed(String),

    #[error("Key remapping event tap was disabled by the system and could not be re-enabled.")]
    Revoked,
}

/// Re-arms an installed filter from inside its own callback
pub trait TapControl {
    /// Switch the filter back on after the OS disabled it.
    ///
    /// Returns whether the filter is enabled afterwards.
    fn reenable(&self) -> bool;
}

/// Creates global key event filters
pub trait TapBackend: Send + Sync {
    /// Install a filter delivering events under `mask` to `filter`.
    ///
    /// The returned handle owns the OS registration; dropping it removes the
    /// filter and its run loop registration.
    fn install(
        &self,
        filter: Arc<RemapFilter>,
        mask: EventMask,
    ) -> Result<Box<dyn InstalledTap>, TapError>;
}

/// An active OS filter. Dropping it tears the filter down.
pub trait InstalledTap: Send {
    /// Whether the OS currently has the filter switched on
    fn is_enabled(&self) -> bool;
}

/// Control for contexts that have no tap to re-arm
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTap;

impl TapControl for NoTap {
    fn reenable(&self) -> bool {
        false
    }
}
