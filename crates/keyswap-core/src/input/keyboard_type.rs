// Keyswap Input Layer - Keyboard Hardware Types
// Tracks the keyboard classes seen in live events, for per-keyboard rule scoping

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

/// Hardware class of a physical keyboard, as reported on each key event
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct KeyboardType(pub i64);

impl KeyboardType {
    /// Get the raw id
    pub fn id(self) -> i64 {
        self.0
    }
}

impl From<i64> for KeyboardType {
    fn from(id: i64) -> Self {
        KeyboardType(id)
    }
}

impl std::fmt::Display for KeyboardType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Human-readable name for a rule scope
pub fn keyboard_label(scope: Option<KeyboardType>) -> String {
    match scope {
        Some(kind) => format!("Keyboard Type {}", kind),
        None => "All Keyboards".to_string(),
    }
}

/// No id has been posted yet
const NONE_POSTED: i64 = i64::MIN;

/// Registry of keyboard types observed in live events.
///
/// The list only grows. Observation happens on the filter callback, which
/// must not block, so new ids are posted to a channel and folded into the
/// visible list by [`KeyboardTypeRegistry::drain_pending`] on the main
/// context.
pub struct KeyboardTypeRegistry {
    /// Sorted, deduplicated ids visible to the UI
    observed: RwLock<SmallVec<[KeyboardType; 4]>>,
    pending_tx: Sender<KeyboardType>,
    pending_rx: Mutex<Receiver<KeyboardType>>,
    /// Last id posted from the callback, to avoid re-posting on every keystroke
    last_posted: AtomicI64,
}

impl Default for KeyboardTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyboardTypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        let (pending_tx, pending_rx) = mpsc::channel();
        Self {
            observed: RwLock::new(SmallVec::new()),
            pending_tx,
            pending_rx: Mutex::new(pending_rx),
            last_posted: AtomicI64::new(NONE_POSTED),
        }
    }

    /// Note a keyboard type seen on the filter callback.
    ///
    /// Never blocks: if the visible list is being written it is skipped, and
    /// the next keystroke from the same keyboard tries again.
    pub fn observe(&self, kind: KeyboardType) {
        if let Some(observed) = self.observed.try_read() {
            if observed.binary_search(&kind).is_ok() {
                return;
            }
        } else {
            return;
        }

        if self.last_posted.swap(kind.0, Ordering::Relaxed) == kind.0 {
            return;
        }
        // The receiver lives as long as self, so send only fails during teardown
        let _ = self.pending_tx.send(kind);
    }

    /// Fold posted ids into the visible list. Call from the main context.
    ///
    /// Returns the number of ids that were new.
    pub fn drain_pending(&self) -> usize {
        let rx = self.pending_rx.lock();
        let mut added = 0;
        for kind in rx.try_iter() {
            let mut observed = self.observed.write();
            if let Err(pos) = observed.binary_search(&kind) {
                observed.insert(pos, kind);
                added += 1;
                log::debug!("Observed new keyboard type {}", kind);
            }
        }
        if added > 0 {
            self.last_posted.store(NONE_POSTED, Ordering::Relaxed);
        }
        added
    }

    /// Snapshot of the observed ids, ascending
    pub fn observed(&self) -> Vec<KeyboardType> {
        self.observed.read().to_vec()
    }

    /// Check whether an id has been folded into the visible list
    pub fn contains(&self, kind: KeyboardType) -> bool {
        self.observed.read().binary_search(&kind).is_ok()
    }
}

impl std::fmt::Debug for KeyboardTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyboardTypeRegistry")
            .field("observed", &*self.observed.read())
            .finish()
    }
}
