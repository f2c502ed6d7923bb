// Keyswap Swap Rules
// A user-defined swap between two characters, optionally scoped to one keyboard type

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::input::{keyboard_label, KeyboardType};
use crate::key::is_swappable;

/// Opaque unique identity of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(Uuid);

impl RuleId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        RuleId(Uuid::new_v4())
    }
}

impl Default for RuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RuleId {
    fn from(uuid: Uuid) -> Self {
        RuleId(uuid)
    }
}

impl std::str::FromStr for RuleId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(RuleId)
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn default_enabled() -> bool {
    true
}

/// Swap two characters on every keyboard, or on one keyboard type.
///
/// The persisted form matches the rule blob stored under
/// `settings.keyboard.rules`:
/// `{"id", "keyboardType"?, "firstKey", "secondKey", "isEnabled"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySwapRule {
    pub id: RuleId,
    /// `None` applies to all keyboards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyboard_type: Option<KeyboardType>,
    pub first_key: char,
    pub second_key: char,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
}

impl KeySwapRule {
    /// Create an enabled rule with a fresh id.
    ///
    /// The pair is stored in canonical (sorted) order, so `(b, a)` and
    /// `(a, b)` produce the same stored pair.
    pub fn new(first: char, second: char, keyboard_type: Option<KeyboardType>) -> Self {
        let (first_key, second_key) = if first <= second {
            (first, second)
        } else {
            (second, first)
        };
        Self {
            id: RuleId::new(),
            keyboard_type,
            first_key,
            second_key,
            is_enabled: true,
        }
    }

    /// Set the enabled flag (builder style)
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.is_enabled = enabled;
        self
    }

    /// The swap target for `c`, if `c` is one side of this rule
    pub fn partner(&self, c: char) -> Option<char> {
        if c == self.first_key {
            Some(self.second_key)
        } else if c == self.second_key {
            Some(self.first_key)
        } else {
            None
        }
    }

    /// Whether the rule applies to events from `keyboard_type`
    pub fn applies_to(&self, keyboard_type: KeyboardType) -> bool {
        match self.keyboard_type {
            Some(scope) => scope == keyboard_type,
            None => true,
        }
    }

    /// Same scope and same unordered pair
    pub fn duplicates(&self, other: &KeySwapRule) -> bool {
        self.keyboard_type == other.keyboard_type && self.pair() == other.pair()
    }

    /// The pair in canonical order
    pub fn pair(&self) -> (char, char) {
        if self.first_key <= self.second_key {
            (self.first_key, self.second_key)
        } else {
            (self.second_key, self.first_key)
        }
    }

    /// Two distinct lowercase letters or digits
    pub fn is_well_formed(&self) -> bool {
        self.first_key != self.second_key
            && is_swappable(self.first_key)
            && is_swappable(self.second_key)
    }

    /// Scope label for display
    pub fn scope_label(&self) -> String {
        keyboard_label(self.keyboard_type)
    }
}

impl fmt::Display for KeySwapRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} <-> {} [{}]{}",
            self.first_key,
            self.second_key,
            self.scope_label(),
            if self.is_enabled { "" } else { " (disabled)" }
        )
    }
}

/// Serialize a rule list to the persisted blob
pub fn encode_rules(rules: &[KeySwapRule]) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(rules)
}

/// Deserialize the persisted blob.
///
/// Entries that decode but break the rule invariants are dropped with a
/// warning; a blob that does not decode at all is an error.
pub fn decode_rules(bytes: &[u8]) -> Result<Vec<KeySwapRule>, serde_json::Error> {
    let decoded: Vec<KeySwapRule> = serde_json::from_slice(bytes)?;
    Ok(decoded
        .into_iter()
        .filter_map(|mut rule| {
            rule.first_key = lower(rule.first_key);
            rule.second_key = lower(rule.second_key);
            if rule.is_well_formed() {
                Some(rule)
            } else {
                log::warn!("Dropping malformed stored rule {}", rule.id);
                None
            }
        })
        .collect())
}

fn lower(c: char) -> char {
    let mut lower = c.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(l), None) => l,
        _ => c,
    }
}
