// Keyswap Permission Gate
// OS trust required before a global event filter may be installed

use std::sync::atomic::{AtomicBool, Ordering};

/// OS-level accessibility / input-monitoring trust query
pub trait TrustProvider: Send + Sync {
    /// Query trust without any UI
    fn is_trusted(&self) -> bool;

    /// Query trust and, if untrusted, ask the OS to show its consent prompt.
    ///
    /// The prompt is asynchronous: the user may grant trust later, which is
    /// only observed by a subsequent query.
    fn request(&self) -> bool;
}

/// Caches the trust state and exposes it to the engine and UI
pub struct PermissionGate {
    provider: Box<dyn TrustProvider>,
    granted: AtomicBool,
}

impl PermissionGate {
    /// Create a gate, querying the current state without prompting
    pub fn new(provider: Box<dyn TrustProvider>) -> Self {
        let granted = provider.is_trusted();
        Self {
            provider,
            granted: AtomicBool::new(granted),
        }
    }

    /// Check trust, showing the OS consent UI if `prompt` is set and the
    /// process is untrusted. Never retries.
    pub fn ensure(&self, prompt: bool) -> bool {
        let trusted = if prompt {
            self.provider.request()
        } else {
            self.provider.is_trusted()
        };
        self.granted.store(trusted, Ordering::SeqCst);
        if !trusted {
            log::debug!("Accessibility permission not granted (prompted: {})", prompt);
        }
        trusted
    }

    /// Re-query without prompting, e.g. when the app regains focus
    pub fn refresh(&self) -> bool {
        self.ensure(false)
    }

    /// Last observed trust state
    pub fn is_granted(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for PermissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionGate")
            .field("granted", &self.is_granted())
            .finish()
    }
}
