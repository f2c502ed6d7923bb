// Keyswap macOS Platform
// OS-backed collaborators for the key remapper

mod ffi;
mod layout;
mod notify;
mod tap;
mod trust;

use std::sync::Arc;
use std::time::Duration;

pub use layout::InputSourceLayout;
pub use notify::InputSourceNotifier;
pub use tap::SessionTapBackend;
pub use trust::AccessibilityTrust;

use crate::remapper::Collaborators;
use crate::rules::KeyValueStore;

/// Collaborators backed by the live OS APIs
pub fn collaborators(storage: Arc<dyn KeyValueStore>) -> Collaborators {
    Collaborators {
        layout_source: Arc::new(InputSourceLayout::new()),
        notifier: Some(Box::new(InputSourceNotifier::new())),
        tap_backend: Box::new(SessionTapBackend::new()),
        trust: Box::new(AccessibilityTrust::new()),
        storage,
    }
}

/// Service the calling thread's run loop for up to `timeout`.
///
/// Call from the main thread so input source notifications are delivered.
pub fn pump_run_loop(timeout: Duration) {
    // SAFETY: runs the current thread's run loop in the default mode
    unsafe {
        ffi::CFRunLoopRunInMode(ffi::kCFRunLoopDefaultMode, timeout.as_secs_f64(), false);
    }
}
