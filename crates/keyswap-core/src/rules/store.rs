// Keyswap Rule Store
// Authoritative ordered rule set, persisted on every mutation

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{RwLock, RwLockWriteGuard};

use crate::input::KeyboardType;
use crate::key::{normalize_character, KeyCode};
use crate::layout::LayoutMap;
use crate::rules::{decode_rules, KeySwapRule, KeyValueStore, RuleId, RULES_KEY};

/// Reasons a rule is rejected on insertion
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("'{0}' is not a single letter or digit")]
    InvalidCharacter(String),

    #[error("both keys are '{0}'")]
    SameCharacter(char),

    #[error("'{0}' is not produced by any key in the current layout")]
    UnmappedCharacter(char),

    #[error("a rule swapping {0} and {1} already exists for this keyboard scope")]
    Duplicate(char, char),
}

/// Ordered set of swap rules.
///
/// Mutated from the main context, scanned by the filter callback on every
/// keystroke. Insertion order is the match order: the first enabled rule
/// that covers a character wins.
pub struct RuleStore {
    rules: RwLock<IndexMap<RuleId, KeySwapRule>>,
    storage: Arc<dyn KeyValueStore>,
}

impl RuleStore {
    /// Load persisted rules. Missing or corrupt data yields an empty store.
    pub fn load(storage: Arc<dyn KeyValueStore>) -> Self {
        let rules = match storage.get(RULES_KEY) {
            Ok(Some(bytes)) => match decode_rules(&bytes) {
                Ok(rules) => rules,
                Err(e) => {
                    log::warn!("Stored rules are unreadable, starting empty: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                log::warn!("Failed to read stored rules, starting empty: {}", e);
                Vec::new()
            }
        };
        log::debug!("Loaded {} swap rules", rules.len());

        Self {
            rules: RwLock::new(rules.into_iter().map(|r| (r.id, r)).collect()),
            storage,
        }
    }

    /// Validate and append a rule.
    ///
    /// Both keys are normalized to one lowercase letter or digit, must differ,
    /// and must each be producible by some key in `layout`. The pair is stored
    /// in canonical order. A rule with the same scope and unordered pair is a
    /// duplicate.
    pub fn add(
        &self,
        first: &str,
        second: &str,
        keyboard_type: Option<KeyboardType>,
        layout: &LayoutMap,
    ) -> Result<KeySwapRule, RuleError> {
        let a = normalize_character(first)
            .ok_or_else(|| RuleError::InvalidCharacter(first.to_string()))?;
        let b = normalize_character(second)
            .ok_or_else(|| RuleError::InvalidCharacter(second.to_string()))?;
        if a == b {
            return Err(RuleError::SameCharacter(a));
        }
        for c in [a, b] {
            if layout.key_code(c).is_none() {
                return Err(RuleError::UnmappedCharacter(c));
            }
        }

        let candidate = KeySwapRule::new(a, b, keyboard_type);
        let mut rules = self.rules.write();
        if rules.values().any(|existing| existing.duplicates(&candidate)) {
            return Err(RuleError::Duplicate(candidate.first_key, candidate.second_key));
        }
        rules.insert(candidate.id, candidate.clone());
        log::debug!("Added rule {} ({})", candidate.id, candidate);
        self.persist(rules);
        Ok(candidate)
    }

    /// Remove a rule by id
    pub fn remove(&self, id: RuleId) -> Option<KeySwapRule> {
        let mut rules = self.rules.write();
        let removed = rules.shift_remove(&id)?;
        log::debug!("Removed rule {}", id);
        self.persist(rules);
        Some(removed)
    }

    /// Replace a rule by id, keeping its position. No-op if the id is unknown.
    ///
    /// Returns whether a rule was replaced.
    pub fn update(&self, rule: KeySwapRule) -> bool {
        let mut rules = self.rules.write();
        let Some(slot) = rules.get_mut(&rule.id) else {
            return false;
        };
        *slot = rule;
        self.persist(rules);
        true
    }

    /// Find a rule by id
    pub fn get(&self, id: RuleId) -> Option<KeySwapRule> {
        self.rules.read().get(&id).cloned()
    }

    /// All rules in match order
    pub fn rules(&self) -> Vec<KeySwapRule> {
        self.rules.read().values().cloned().collect()
    }

    /// Number of rules, enabled or not
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    /// Check if the store holds no rules
    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    /// Resolve the replacement key for a keystroke.
    ///
    /// Scans enabled rules in insertion order; the first one that applies to
    /// `keyboard_type` and contains `c` decides. Its partner character is
    /// resolved through `layout`; if the partner has no key code the
    /// keystroke is left alone rather than falling through to later rules.
    ///
    /// Allocation-free; runs on the filter callback.
    pub fn replacement(
        &self,
        c: char,
        keyboard_type: KeyboardType,
        layout: &LayoutMap,
    ) -> Option<KeyCode> {
        let rules = self.rules.read();
        let partner = rules
            .values()
            .filter(|rule| rule.is_enabled && rule.applies_to(keyboard_type))
            .find_map(|rule| rule.partner(c))?;
        layout.key_code(partner)
    }

    /// Encode under a read lock, write outside any lock
    fn persist(&self, guard: RwLockWriteGuard<'_, IndexMap<RuleId, KeySwapRule>>) {
        let rules = RwLockWriteGuard::downgrade(guard);
        let snapshot: Vec<&KeySwapRule> = rules.values().collect();
        let encoded = serde_json::to_vec(&snapshot);
        drop(rules);

        match encoded {
            Ok(bytes) => {
                if let Err(e) = self.storage.set(RULES_KEY, &bytes) {
                    log::warn!("Failed to persist swap rules: {}", e);
                }
            }
            Err(e) => log::warn!("Failed to encode swap rules: {}", e),
        }
    }
}

impl std::fmt::Debug for RuleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleStore")
            .field("rules", &self.rules.read().len())
            .finish()
    }
}
