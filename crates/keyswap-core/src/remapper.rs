// Keyswap Remapper
// Process-wide composition root exposing the key swap facility to a UI

use std::sync::Arc;

use crate::engine::{Disposition, EngineStatus, RemapEngine, RemapFilter, TapBackend, TapControl};
use crate::input::{keyboard_label, KeyEvent, KeyboardType, KeyboardTypeRegistry};
use crate::key::is_letter_or_digit;
use crate::layout::{LayoutChangeWatcher, LayoutMap, LayoutNotifier, LayoutSource, LayoutTable};
use crate::permission::{PermissionGate, TrustProvider};
use crate::rules::{KeySwapRule, KeyValueStore, RuleError, RuleId, RuleStore, REMAP_ENABLED_KEY};

/// OS-facing dependencies of a [`KeyRemapper`]
pub struct Collaborators {
    /// Active keyboard layout query
    pub layout_source: Arc<dyn LayoutSource>,
    /// Input source change notifications; `None` disables live layout tracking
    pub notifier: Option<Box<dyn LayoutNotifier>>,
    /// Global event filter factory
    pub tap_backend: Box<dyn TapBackend>,
    /// Accessibility trust query
    pub trust: Box<dyn TrustProvider>,
    /// Durable storage for rules and the enable flag
    pub storage: Arc<dyn KeyValueStore>,
}

/// Outcome of one [`KeyRemapper::process_pending`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingWork {
    /// Keyboard types recorded for the first time
    pub new_keyboard_types: usize,
    /// The event tap died and was removed
    pub tap_removed: bool,
}

/// The key swap facility as the UI sees it.
///
/// Owns the layout table, rule store, keyboard registry, engine and layout
/// watcher, and wires them together. All methods are called from the main
/// context except [`KeyRemapper::handle`], which may run on the filter
/// callback.
pub struct KeyRemapper {
    layout: Arc<LayoutTable>,
    rules: Arc<RuleStore>,
    keyboards: Arc<KeyboardTypeRegistry>,
    engine: RemapEngine,
    watcher: Option<LayoutChangeWatcher>,
    storage: Arc<dyn KeyValueStore>,
}

impl KeyRemapper {
    /// Assemble the facility and restore persisted state.
    ///
    /// Loads rules, builds the layout table, subscribes to layout changes,
    /// and if remapping was left enabled goes through the same permission
    /// and install path as [`KeyRemapper::set_remap_enabled`].
    pub fn new(collaborators: Collaborators) -> Self {
        let Collaborators {
            layout_source,
            notifier,
            tap_backend,
            trust,
            storage,
        } = collaborators;

        let rules = Arc::new(RuleStore::load(storage.clone()));
        let layout = Arc::new(LayoutTable::new(layout_source));
        if let Err(e) = layout.rebuild() {
            log::warn!("Initial layout table unavailable: {}", e);
        }

        let watcher = notifier.and_then(|notifier| {
            match LayoutChangeWatcher::start(notifier.as_ref(), layout.clone()) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    log::warn!("Layout changes will not be tracked: {}", e);
                    None
                }
            }
        });

        let keyboards = Arc::new(KeyboardTypeRegistry::new());
        let filter = Arc::new(RemapFilter::new(layout.clone(), rules.clone(), keyboards.clone()));
        let permission = Arc::new(PermissionGate::new(trust));
        let engine = RemapEngine::new(filter, tap_backend, permission);

        let remapper = Self {
            layout,
            rules,
            keyboards,
            engine,
            watcher,
            storage,
        };
        if remapper.storage.get_bool(REMAP_ENABLED_KEY, false) {
            remapper.set_remap_enabled(true);
        }
        remapper
    }

    /// Whether the user wants remapping on
    pub fn is_remap_enabled(&self) -> bool {
        self.engine.is_enabled()
    }

    /// Turn remapping on or off and persist the choice.
    ///
    /// Turning it on prompts for permission if needed; if permission is
    /// still missing it stays off. Returns the resulting state.
    pub fn set_remap_enabled(&self, enabled: bool) -> bool {
        let enabled = self.engine.set_enabled(enabled);
        self.persist_enabled(enabled);
        enabled
    }

    /// Rules in match order
    pub fn rules(&self) -> Vec<KeySwapRule> {
        self.rules.rules()
    }

    /// Look up one rule
    pub fn rule(&self, id: RuleId) -> Option<KeySwapRule> {
        self.rules.get(id)
    }

    /// Keyboard types seen in live events, ascending
    pub fn seen_keyboard_types(&self) -> Vec<KeyboardType> {
        self.keyboards.observed()
    }

    /// Last observed accessibility trust
    pub fn accessibility_granted(&self) -> bool {
        self.engine.permission().is_granted()
    }

    /// Human-readable reason the engine last failed to start
    pub fn last_start_error(&self) -> Option<String> {
        self.engine.last_error()
    }

    /// Snapshot for status displays
    pub fn status(&self) -> EngineStatus {
        self.engine.status()
    }

    /// Add a swap rule; `false` if it is invalid or a duplicate
    pub fn add_rule(&self, first: &str, second: &str, keyboard_type: Option<KeyboardType>) -> bool {
        self.try_add_rule(first, second, keyboard_type).is_ok()
    }

    /// Add a swap rule, reporting why it was rejected.
    ///
    /// On success the engine installs if remapping is enabled. If permission
    /// turns out to be missing, remapping is switched off but the rule is
    /// kept.
    pub fn try_add_rule(
        &self,
        first: &str,
        second: &str,
        keyboard_type: Option<KeyboardType>,
    ) -> Result<KeySwapRule, RuleError> {
        let rule = self
            .rules
            .add(first, second, keyboard_type, &self.layout.snapshot())?;
        let was_enabled = self.engine.is_enabled();
        self.engine.rules_changed();
        if was_enabled && !self.engine.is_enabled() {
            self.persist_enabled(false);
        }
        Ok(rule)
    }

    /// Add a rule from a two-character string such as `"fg"`
    pub fn add_rule_pair(&self, pair: &str, keyboard_type: Option<KeyboardType>) -> bool {
        self.try_add_rule_pair(pair, keyboard_type).is_ok()
    }

    /// Add a rule from a two-character string, reporting why it was rejected.
    ///
    /// The string is lowercased and stripped of anything but letters and
    /// digits; exactly two distinct characters must remain.
    pub fn try_add_rule_pair(
        &self,
        pair: &str,
        keyboard_type: Option<KeyboardType>,
    ) -> Result<KeySwapRule, RuleError> {
        let chars: Vec<char> = pair
            .chars()
            .flat_map(char::to_lowercase)
            .filter(|&c| is_letter_or_digit(c))
            .collect();
        let [first, second] = chars[..] else {
            return Err(RuleError::InvalidCharacter(pair.to_string()));
        };
        if first == second {
            return Err(RuleError::SameCharacter(first));
        }
        self.try_add_rule(&first.to_string(), &second.to_string(), keyboard_type)
    }

    /// Remove a rule; the event tap goes away with the last rule
    pub fn remove_rule(&self, id: RuleId) -> Option<KeySwapRule> {
        let removed = self.rules.remove(id)?;
        self.engine.rules_changed();
        Some(removed)
    }

    /// Replace a rule by id; `false` if no such rule exists
    pub fn update_rule(&self, rule: KeySwapRule) -> bool {
        self.rules.update(rule)
    }

    /// Switch one rule on or off; `false` if no such rule exists
    pub fn set_rule_enabled(&self, id: RuleId, enabled: bool) -> bool {
        match self.rules.get(id) {
            Some(rule) => self.update_rule(rule.with_enabled(enabled)),
            None => false,
        }
    }

    /// Check accessibility trust, optionally prompting.
    ///
    /// Records the denial as the last start error, or clears it.
    pub fn ensure_accessibility_permission(&self, prompt: bool) -> bool {
        self.engine.ensure_permission(prompt)
    }

    /// Re-query trust without prompting, installing if it was just granted
    pub fn refresh_accessibility_status(&self) -> bool {
        self.engine.refresh_permission()
    }

    /// Characters the current layout can produce, sorted
    pub fn supported_characters(&self) -> Vec<char> {
        self.layout.supported_characters()
    }

    /// Current layout table snapshot
    pub fn layout(&self) -> Arc<LayoutMap> {
        self.layout.snapshot()
    }

    /// Re-derive the layout table now
    pub fn rebuild_layout(&self) -> bool {
        match self.layout.rebuild() {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Layout rebuild failed: {}", e);
                false
            }
        }
    }

    /// Display name for a rule scope
    pub fn keyboard_label(&self, keyboard_type: Option<KeyboardType>) -> String {
        keyboard_label(keyboard_type)
    }

    /// Whether layout changes are being tracked
    pub fn is_watching_layout(&self) -> bool {
        self.watcher.as_ref().is_some_and(LayoutChangeWatcher::is_active)
    }

    /// Apply work the filter callback deferred to the main context.
    ///
    /// Folds newly seen keyboard types into the visible list and removes the
    /// event tap if it died. Call periodically from the main loop.
    pub fn process_pending(&self) -> PendingWork {
        PendingWork {
            new_keyboard_types: self.keyboards.drain_pending(),
            tap_removed: self.engine.reconcile(),
        }
    }

    /// Run one intercepted event through the swap rules
    pub fn handle<E: KeyEvent + ?Sized>(&self, event: &mut E, tap: &dyn TapControl) -> Disposition {
        self.engine.handle(event, tap)
    }

    /// Stop tracking layout changes and remove the event tap.
    ///
    /// The persisted enable flag is left untouched so the next start restores
    /// it.
    pub fn shutdown(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
        }
        self.engine.uninstall();
        log::debug!("Key remapper shut down");
    }

    fn persist_enabled(&self, enabled: bool) {
        if let Err(e) = self.storage.set_bool(REMAP_ENABLED_KEY, enabled) {
            log::warn!("Failed to save remap enabled flag: {}", e);
        }
    }
}

impl Drop for KeyRemapper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for KeyRemapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRemapper")
            .field("engine", &self.engine)
            .field("rules", &self.rules.len())
            .field("watching_layout", &self.is_watching_layout())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessTapBackend, ManualNotifier, StaticLayout, StaticTrust};
    use crate::rules::MemoryStore;

    fn remapper(storage: Arc<MemoryStore>) -> (KeyRemapper, HeadlessTapBackend) {
        let backend = HeadlessTapBackend::new();
        let remapper = KeyRemapper::new(Collaborators {
            layout_source: Arc::new(StaticLayout::us_ansi()),
            notifier: Some(Box::new(ManualNotifier::new())),
            tap_backend: Box::new(backend.clone()),
            trust: Box::new(StaticTrust::granted()),
            storage,
        });
        (remapper, backend)
    }

    #[test]
    fn test_add_rule_pair_normalizes() {
        let (remapper, _) = remapper(Arc::new(MemoryStore::new()));
        assert!(remapper.add_rule_pair("G-F", None));

        let rule = &remapper.rules()[0];
        assert_eq!(rule.pair(), ('f', 'g'));
    }

    #[test]
    fn test_add_rule_pair_rejects_bad_input() {
        let (remapper, _) = remapper(Arc::new(MemoryStore::new()));
        assert_eq!(
            remapper.try_add_rule_pair("f", None).unwrap_err(),
            RuleError::InvalidCharacter("f".to_string())
        );
        assert_eq!(
            remapper.try_add_rule_pair("fgh", None).unwrap_err(),
            RuleError::InvalidCharacter("fgh".to_string())
        );
        assert_eq!(remapper.try_add_rule_pair("ff", None).unwrap_err(), RuleError::SameCharacter('f'));
        assert!(remapper.rules().is_empty());
    }

    #[test]
    fn test_enable_flag_is_persisted_and_restored() {
        let storage = Arc::new(MemoryStore::new());
        {
            let (remapper, _) = remapper(storage.clone());
            assert!(remapper.add_rule("a", "s", None));
            assert!(remapper.set_remap_enabled(true));
        }

        let (restored, backend) = remapper(storage);
        assert!(restored.is_remap_enabled());
        assert_eq!(restored.rules().len(), 1);
        assert!(backend.is_installed());
    }

    #[test]
    fn test_shutdown_keeps_persisted_flag() {
        let storage = Arc::new(MemoryStore::new());
        let (mut remapper, backend) = remapper(storage.clone());
        remapper.add_rule("a", "s", None);
        remapper.set_remap_enabled(true);

        remapper.shutdown();
        assert!(!backend.is_installed());
        assert!(!remapper.is_watching_layout());
        assert!(storage.get_bool(REMAP_ENABLED_KEY, false));
    }

    #[test]
    fn test_set_rule_enabled() {
        let (remapper, _) = remapper(Arc::new(MemoryStore::new()));
        remapper.add_rule("a", "s", None);
        let id = remapper.rules()[0].id;

        assert!(remapper.set_rule_enabled(id, false));
        assert!(!remapper.rule(id).unwrap().is_enabled);
        assert!(!remapper.set_rule_enabled(RuleId::new(), false));
    }

    #[test]
    fn test_ensure_accessibility_permission() {
        let trust = StaticTrust::denied();
        let handle = trust.handle();
        let remapper = KeyRemapper::new(Collaborators {
            layout_source: Arc::new(StaticLayout::us_ansi()),
            notifier: None,
            tap_backend: Box::new(HeadlessTapBackend::new()),
            trust: Box::new(trust),
            storage: Arc::new(MemoryStore::new()),
        });

        assert!(!remapper.ensure_accessibility_permission(false));
        assert_eq!(handle.prompts(), 0);
        assert_eq!(
            remapper.last_start_error().as_deref(),
            Some("Enable Accessibility permission for key remapping.")
        );

        handle.grant_on_prompt(true);
        assert!(remapper.ensure_accessibility_permission(true));
        assert_eq!(handle.prompts(), 1);
        assert!(remapper.accessibility_granted());
        assert_eq!(remapper.last_start_error(), None);
    }

    #[test]
    fn test_keyboard_label() {
        let (remapper, _) = remapper(Arc::new(MemoryStore::new()));
        assert_eq!(remapper.keyboard_label(None), "All Keyboards");
        assert_eq!(remapper.keyboard_label(Some(KeyboardType(40))), "Keyboard Type 40");
    }
}
