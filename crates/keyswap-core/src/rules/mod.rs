// Keyswap Rules Module
// Swap rule model, ordered store and its durable persistence

mod rule;
mod storage;
mod store;

pub use rule::{decode_rules, encode_rules, KeySwapRule, RuleId};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError, REMAP_ENABLED_KEY, RULES_KEY};
pub use store::{RuleError, RuleStore};
