// Keyswap Headless Backends
// In-process stand-ins for the OS layout, trust, tap and notification APIs

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::engine::{Disposition, InstalledTap, RemapFilter, TapBackend, TapControl, TapError};
use crate::input::{EventMask, SyntheticEvent};
use crate::key::KeyCode;
use crate::layout::{
    ChangeCallback, KeyTranslator, LayoutError, LayoutNotifier, LayoutSource, Subscription,
};
use crate::permission::TrustProvider;
use crate::remapper::Collaborators;
use crate::rules::KeyValueStore;

/// Unmodified output of the US ANSI layout by Mac virtual key code
const US_ANSI: &[(u16, &str)] = &[
    (0, "a"),
    (1, "s"),
    (2, "d"),
    (3, "f"),
    (4, "h"),
    (5, "g"),
    (6, "z"),
    (7, "x"),
    (8, "c"),
    (9, "v"),
    (11, "b"),
    (12, "q"),
    (13, "w"),
    (14, "e"),
    (15, "r"),
    (16, "y"),
    (17, "t"),
    (18, "1"),
    (19, "2"),
    (20, "3"),
    (21, "4"),
    (22, "6"),
    (23, "5"),
    (24, "="),
    (25, "9"),
    (26, "7"),
    (27, "-"),
    (28, "8"),
    (29, "0"),
    (30, "]"),
    (31, "o"),
    (32, "u"),
    (33, "["),
    (34, "i"),
    (35, "p"),
    (37, "l"),
    (38, "j"),
    (39, "'"),
    (40, "k"),
    (41, ";"),
    (42, "\\"),
    (43, ","),
    (44, "/"),
    (45, "n"),
    (46, "m"),
    (47, "."),
    (49, " "),
    (50, "`"),
];

/// Fixed key code to output table standing in for the OS layout API
#[derive(Debug)]
pub struct StaticLayout {
    outputs: RwLock<HashMap<u16, String>>,
    available: AtomicBool,
}

impl StaticLayout {
    /// Layout producing the given output for each key code
    pub fn from_pairs(pairs: &[(u16, &str)]) -> Self {
        Self {
            outputs: RwLock::new(to_outputs(pairs)),
            available: AtomicBool::new(true),
        }
    }

    /// The US ANSI layout, used off macOS
    pub fn us_ansi() -> Self {
        Self::from_pairs(US_ANSI)
    }

    /// Swap in a different layout, as if the user changed input source
    pub fn replace(&self, pairs: &[(u16, &str)]) {
        *self.outputs.write() = to_outputs(pairs);
    }

    /// Make subsequent loads fail, as when the OS returns no layout data
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

fn to_outputs(pairs: &[(u16, &str)]) -> HashMap<u16, String> {
    pairs
        .iter()
        .map(|(code, output)| (*code, (*output).to_string()))
        .collect()
}

struct StaticTranslator(HashMap<u16, String>);

impl KeyTranslator for StaticTranslator {
    fn translate(&self, code: KeyCode) -> Option<String> {
        self.0.get(&code.code()).cloned()
    }
}

impl LayoutSource for StaticLayout {
    fn load(&self) -> Result<Box<dyn KeyTranslator + '_>, LayoutError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(LayoutError::Unavailable("static layout switched off".to_string()));
        }
        Ok(Box::new(StaticTranslator(self.outputs.read().clone())))
    }
}

#[derive(Debug, Default)]
struct TrustState {
    trusted: AtomicBool,
    grant_on_prompt: AtomicBool,
    prompts: AtomicUsize,
}

/// Trust provider with a fixed, externally adjustable answer
#[derive(Debug)]
pub struct StaticTrust {
    state: Arc<TrustState>,
}

/// Adjusts a [`StaticTrust`] after it was handed to the engine
#[derive(Debug, Clone)]
pub struct TrustHandle {
    state: Arc<TrustState>,
}

impl StaticTrust {
    /// A process that already has permission
    pub fn granted() -> Self {
        Self::with(true)
    }

    /// A process without permission
    pub fn denied() -> Self {
        Self::with(false)
    }

    fn with(trusted: bool) -> Self {
        let state = TrustState::default();
        state.trusted.store(trusted, Ordering::SeqCst);
        Self {
            state: Arc::new(state),
        }
    }

    /// Handle sharing this provider's state
    pub fn handle(&self) -> TrustHandle {
        TrustHandle {
            state: self.state.clone(),
        }
    }
}

impl TrustHandle {
    /// Grant or revoke, as the user would in system settings
    pub fn set_trusted(&self, trusted: bool) {
        self.state.trusted.store(trusted, Ordering::SeqCst);
    }

    /// Make the next prompt grant permission, as if the user approved it
    pub fn grant_on_prompt(&self, grant: bool) {
        self.state.grant_on_prompt.store(grant, Ordering::SeqCst);
    }

    /// How many times the consent prompt was requested
    pub fn prompts(&self) -> usize {
        self.state.prompts.load(Ordering::SeqCst)
    }
}

impl TrustProvider for StaticTrust {
    fn is_trusted(&self) -> bool {
        self.state.trusted.load(Ordering::SeqCst)
    }

    fn request(&self) -> bool {
        if self.is_trusted() {
            return true;
        }
        self.state.prompts.fetch_add(1, Ordering::SeqCst);
        if self.state.grant_on_prompt.swap(false, Ordering::SeqCst) {
            self.state.trusted.store(true, Ordering::SeqCst);
        }
        self.is_trusted()
    }
}

#[derive(Default)]
struct TapState {
    filter: Mutex<Option<Arc<RemapFilter>>>,
    installs: AtomicUsize,
    reenables: AtomicUsize,
    reenable_fails: AtomicBool,
    /// The OS has switched the live tap off
    disabled: AtomicBool,
    install_error: Mutex<Option<String>>,
}

/// Tap backend that records installs and delivers synthetic events.
///
/// Clones share state, so a test keeps one clone after handing the other to
/// the engine.
#[derive(Clone, Default)]
pub struct HeadlessTapBackend {
    state: Arc<TapState>,
}

impl HeadlessTapBackend {
    /// Backend whose installs and re-enables succeed
    pub fn new() -> Self {
        Self::default()
    }

    /// Make installs fail with `reason`, or succeed again with `None`
    pub fn fail_installs(&self, reason: Option<&str>) {
        *self.state.install_error.lock() = reason.map(str::to_string);
    }

    /// Control whether re-enabling after an OS disable works
    pub fn set_reenable_succeeds(&self, succeeds: bool) {
        self.state.reenable_fails.store(!succeeds, Ordering::SeqCst);
    }

    /// Switch the live tap off without a notice, as the OS may do
    pub fn disable_silently(&self) {
        self.state.disabled.store(true, Ordering::SeqCst);
    }

    /// Whether a tap is currently installed
    pub fn is_installed(&self) -> bool {
        self.state.filter.lock().is_some()
    }

    /// Successful installs so far
    pub fn install_count(&self) -> usize {
        self.state.installs.load(Ordering::SeqCst)
    }

    /// Re-enable attempts so far
    pub fn reenable_count(&self) -> usize {
        self.state.reenables.load(Ordering::SeqCst)
    }

    /// Deliver an event as the OS would: only if a tap is installed.
    ///
    /// Returns `None` when no tap exists and the event went straight to the
    /// focused application.
    pub fn deliver(&self, event: &mut SyntheticEvent) -> Option<Disposition> {
        let filter = self.state.filter.lock().clone()?;
        Some(filter.handle(event, self))
    }
}

impl TapControl for HeadlessTapBackend {
    fn reenable(&self) -> bool {
        self.state.reenables.fetch_add(1, Ordering::SeqCst);
        let enabled = !self.state.reenable_fails.load(Ordering::SeqCst);
        self.state.disabled.store(!enabled, Ordering::SeqCst);
        enabled
    }
}

impl TapBackend for HeadlessTapBackend {
    fn install(
        &self,
        filter: Arc<RemapFilter>,
        _mask: EventMask,
    ) -> Result<Box<dyn InstalledTap>, TapError> {
        if let Some(reason) = self.state.install_error.lock().clone() {
            return Err(TapError::CreateFailed(reason));
        }
        let mut slot = self.state.filter.lock();
        if slot.is_some() {
            return Err(TapError::CreateFailed("a tap is already installed".to_string()));
        }
        *slot = Some(filter);
        self.state.disabled.store(false, Ordering::SeqCst);
        self.state.installs.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(HeadlessTap {
            state: self.state.clone(),
        }))
    }
}

impl std::fmt::Debug for HeadlessTapBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessTapBackend")
            .field("installed", &self.is_installed())
            .field("installs", &self.install_count())
            .finish()
    }
}

struct HeadlessTap {
    state: Arc<TapState>,
}

impl InstalledTap for HeadlessTap {
    fn is_enabled(&self) -> bool {
        !self.state.disabled.load(Ordering::SeqCst)
    }
}

impl Drop for HeadlessTap {
    fn drop(&mut self) {
        self.state.filter.lock().take();
    }
}

#[derive(Default)]
struct NotifierState {
    next_id: u64,
    subscribers: Vec<(u64, ChangeCallback)>,
}

/// Layout change notifier fired by hand
#[derive(Clone, Default)]
pub struct ManualNotifier {
    state: Arc<Mutex<NotifierState>>,
}

impl ManualNotifier {
    /// Notifier with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke every subscriber, as the OS does on an input source change
    pub fn fire(&self) {
        let callbacks: Vec<ChangeCallback> = self
            .state
            .lock()
            .subscribers
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback();
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }
}

impl LayoutNotifier for ManualNotifier {
    fn subscribe(&self, on_change: ChangeCallback) -> Result<Subscription, LayoutError> {
        let id = {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.subscribers.push((id, on_change));
            id
        };
        let state = self.state.clone();
        Ok(Subscription::new(move || {
            state.lock().subscribers.retain(|(sub, _)| *sub != id);
        }))
    }
}

impl std::fmt::Debug for ManualNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualNotifier")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Collaborators for hosts without an OS event filter.
///
/// Uses the US ANSI layout, treats the process as trusted, and records
/// installs instead of intercepting anything.
pub fn collaborators(storage: Arc<dyn KeyValueStore>) -> Collaborators {
    Collaborators {
        layout_source: Arc::new(StaticLayout::us_ansi()),
        notifier: None,
        tap_backend: Box::new(HeadlessTapBackend::new()),
        trust: Box::new(StaticTrust::granted()),
        storage,
    }
}
