// Keyswap Remap Engine
// Owns the global event filter: install, teardown, and recovery

use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::{Disposition, InstalledTap, RemapFilter, TapBackend, TapControl, TapError};
use crate::input::{EventMask, KeyEvent};
use crate::permission::PermissionGate;

/// Filter lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum EngineState {
    /// No OS filter exists
    Disabled,
    /// An install attempt is in progress
    Installing,
    /// The OS filter is live and rewriting events
    Installed,
}

/// Point-in-time view of the engine for status displays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub enabled: bool,
    pub state: EngineState,
    pub permission_granted: bool,
    pub last_error: Option<String>,
}

struct EngineInner {
    /// User intent; the filter only exists while this is set
    enabled: bool,
    state: EngineState,
    tap: Option<Box<dyn InstalledTap>>,
    last_error: Option<String>,
}

/// Installs and tears down the global event filter.
///
/// Invariants kept under the lifecycle lock:
/// - at most one OS filter exists at a time
/// - no filter exists while the user intent is off or the rule set is empty
/// - every failed install or lost filter leaves `last_error` set and the
///   state `Disabled`
pub struct RemapEngine {
    filter: Arc<RemapFilter>,
    backend: Box<dyn TapBackend>,
    permission: Arc<PermissionGate>,
    inner: Mutex<EngineInner>,
}

impl RemapEngine {
    /// Create a disabled engine
    pub fn new(
        filter: Arc<RemapFilter>,
        backend: Box<dyn TapBackend>,
        permission: Arc<PermissionGate>,
    ) -> Self {
        Self {
            filter,
            backend,
            permission,
            inner: Mutex::new(EngineInner {
                enabled: false,
                state: EngineState::Disabled,
                tap: None,
                last_error: None,
            }),
        }
    }

    /// Set the user intent.
    ///
    /// Enabling checks permission with the OS prompt; if it is still denied
    /// the intent reverts to off. Otherwise the filter is installed when
    /// rules exist. Disabling tears the filter down.
    ///
    /// Returns the resulting intent.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        let mut inner = self.inner.lock();
        if !enabled {
            inner.enabled = false;
            self.uninstall_locked(&mut inner);
            return false;
        }

        if !self.check_permission_locked(&mut inner, true) {
            inner.enabled = false;
            self.uninstall_locked(&mut inner);
            return false;
        }
        inner.enabled = true;
        self.install_locked(&mut inner);
        true
    }

    /// Install the filter if intent is on, rules exist, and none is installed.
    ///
    /// Permission is re-checked without prompting and the layout table is
    /// rebuilt immediately before the OS filter is created. Idempotent.
    pub fn install(&self) {
        let mut inner = self.inner.lock();
        self.install_locked(&mut inner);
    }

    /// Tear the filter down. The user intent is left as is.
    pub fn uninstall(&self) {
        let mut inner = self.inner.lock();
        self.uninstall_locked(&mut inner);
    }

    /// Check permission, recording or clearing the denial message
    pub fn ensure_permission(&self, prompt: bool) -> bool {
        let mut inner = self.inner.lock();
        self.check_permission_locked(&mut inner, prompt)
    }

    /// Re-query permission without prompting.
    ///
    /// A grant installs the filter if intent is on; a revocation tears an
    /// installed filter down.
    pub fn refresh_permission(&self) -> bool {
        let mut inner = self.inner.lock();
        let granted = self.permission.refresh();
        if granted {
            if inner.enabled {
                self.install_locked(&mut inner);
            }
        } else if inner.tap.is_some() {
            log::warn!("Accessibility permission revoked, removing event tap");
            self.uninstall_locked(&mut inner);
            inner.last_error = Some(TapError::PermissionDenied.to_string());
        }
        granted
    }

    /// Re-evaluate after the rule set changed.
    ///
    /// An empty set removes the filter. A non-empty set with intent on and no
    /// filter checks permission (prompting) and installs; if permission is
    /// denied the intent reverts to off.
    pub fn rules_changed(&self) {
        let mut inner = self.inner.lock();
        if self.filter.rules().is_empty() {
            self.uninstall_locked(&mut inner);
            return;
        }
        if !inner.enabled || inner.tap.is_some() {
            return;
        }
        if !self.check_permission_locked(&mut inner, true) {
            inner.enabled = false;
            return;
        }
        self.install_locked(&mut inner);
    }

    /// Act on what the filter callback reported since the last call.
    ///
    /// A failed self re-enable, or a filter the OS switched off without
    /// telling the callback, means the OS filter is dead: it is torn down and
    /// the failure recorded. Call from the main context.
    ///
    /// Returns true if the filter was torn down.
    pub fn reconcile(&self) -> bool {
        let rearms = self.filter.take_rearms();
        if rearms > 0 {
            log::info!("Event tap re-enabled {} time(s) after being disabled by the system", rearms);
        }
        let rearm_failed = self.filter.take_rearm_failed();

        let mut inner = self.inner.lock();
        let Some(tap) = inner.tap.as_ref() else {
            return false;
        };
        if rearm_failed {
            log::warn!("Event tap could not be re-enabled, removing it");
        } else if !tap.is_enabled() {
            log::warn!("Event tap was switched off by the system, removing it");
        } else {
            return false;
        }
        self.uninstall_locked(&mut inner);
        inner.last_error = Some(TapError::Revoked.to_string());
        true
    }

    /// Run one event through the filter
    pub fn handle<E: KeyEvent + ?Sized>(&self, event: &mut E, tap: &dyn TapControl) -> Disposition {
        self.filter.handle(event, tap)
    }

    /// Current user intent
    pub fn is_enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    /// Current lifecycle state
    pub fn state(&self) -> EngineState {
        self.inner.lock().state
    }

    /// Whether an OS filter is live
    pub fn is_installed(&self) -> bool {
        self.inner.lock().tap.is_some()
    }

    /// Message from the most recent failed start, if any
    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    /// Snapshot for status displays
    pub fn status(&self) -> EngineStatus {
        let inner = self.inner.lock();
        EngineStatus {
            enabled: inner.enabled,
            state: inner.state,
            permission_granted: self.permission.is_granted(),
            last_error: inner.last_error.clone(),
        }
    }

    /// Shared filter state
    pub fn filter(&self) -> &Arc<RemapFilter> {
        &self.filter
    }

    /// Permission gate the engine consults
    pub fn permission(&self) -> &Arc<PermissionGate> {
        &self.permission
    }

    fn check_permission_locked(&self, inner: &mut EngineInner, prompt: bool) -> bool {
        let granted = self.permission.ensure(prompt);
        inner.last_error = if granted {
            None
        } else {
            Some(TapError::PermissionDenied.to_string())
        };
        granted
    }

    fn install_locked(&self, inner: &mut EngineInner) {
        if inner.tap.is_some() || !inner.enabled || self.filter.rules().is_empty() {
            return;
        }
        if !self.check_permission_locked(inner, false) {
            log::info!("Not installing event tap: accessibility permission missing");
            return;
        }
        if let Err(e) = self.filter.layout().rebuild() {
            log::warn!("Layout rebuild before install failed, using previous table: {}", e);
        }

        inner.state = EngineState::Installing;
        self.filter.set_active(true);
        match self.backend.install(self.filter.clone(), EventMask::KEYS) {
            Ok(tap) => {
                inner.tap = Some(tap);
                inner.state = EngineState::Installed;
                inner.last_error = None;
                log::info!("Key remapping event tap installed ({} rules)", self.filter.rules().len());
            }
            Err(e) => {
                self.filter.set_active(false);
                inner.state = EngineState::Disabled;
                log::error!("{}", e);
                inner.last_error = Some(e.to_string());
            }
        }
    }

    fn uninstall_locked(&self, inner: &mut EngineInner) {
        self.filter.set_active(false);
        inner.state = EngineState::Disabled;
        if let Some(tap) = inner.tap.take() {
            drop(tap);
            log::info!("Key remapping event tap removed");
        }
    }
}

impl Drop for RemapEngine {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        self.filter.set_active(false);
        drop(inner.tap.take());
    }
}

impl std::fmt::Debug for RemapEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemapEngine")
            .field("status", &self.status())
            .finish()
    }
}
