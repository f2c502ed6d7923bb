// Keyswap Layout Change Watcher
// Rebuilds the layout table whenever the OS reports an input source change

use std::sync::Arc;

use crate::layout::{LayoutError, LayoutTable};

/// Callback invoked on a layout change notification
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Live registration with a notification source. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap the action that removes the registration
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Unsubscribe now instead of on drop
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Source of "keyboard input source changed" notifications
pub trait LayoutNotifier {
    /// Register `on_change` until the returned subscription is dropped
    fn subscribe(&self, on_change: ChangeCallback) -> Result<Subscription, LayoutError>;
}

/// Keeps a layout table in step with the OS keyboard layout
#[derive(Debug)]
pub struct LayoutChangeWatcher {
    subscription: Option<Subscription>,
}

impl LayoutChangeWatcher {
    /// Subscribe to layout changes, rebuilding `table` on each one
    pub fn start(
        notifier: &dyn LayoutNotifier,
        table: Arc<LayoutTable>,
    ) -> Result<Self, LayoutError> {
        let on_change: ChangeCallback = Arc::new(move || {
            log::debug!("Keyboard input source changed, rebuilding layout table");
            // A failed rebuild keeps the previous table and is logged there
            let _ = table.rebuild();
        });
        let subscription = notifier.subscribe(on_change)?;
        Ok(Self {
            subscription: Some(subscription),
        })
    }

    /// Whether the watcher is still subscribed
    pub fn is_active(&self) -> bool {
        self.subscription.is_some()
    }

    /// Unsubscribe. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
    }
}

impl Drop for LayoutChangeWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
