// Keyswap Layout Module
// Active keyboard layout: query seam, derived table, change watcher

mod source;
mod table;
mod watcher;

pub use source::{KeyTranslator, LayoutError, LayoutSource};
pub use table::{LayoutMap, LayoutTable};
pub use watcher::{ChangeCallback, LayoutChangeWatcher, LayoutNotifier, Subscription};
