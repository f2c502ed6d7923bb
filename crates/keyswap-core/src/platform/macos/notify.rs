// Keyswap macOS Input Source Notifications
// Distributed notifications for keyboard input source changes

use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::layout::{ChangeCallback, LayoutError, LayoutNotifier, Subscription};
use crate::platform::macos::ffi;

/// Notifies on "selected" and "enabled" keyboard input source changes.
///
/// Notifications are delivered on the main thread's run loop, so the main
/// thread must be pumping it.
#[derive(Debug, Default, Clone, Copy)]
pub struct InputSourceNotifier;

impl InputSourceNotifier {
    pub fn new() -> Self {
        Self
    }
}

extern "C" fn on_notification(
    _center: ffi::CFNotificationCenterRef,
    observer: *mut c_void,
    _name: ffi::CFStringRef,
    _object: *const c_void,
    _user_info: ffi::CFDictionaryRef,
) {
    if observer.is_null() {
        return;
    }
    // SAFETY: observer is the boxed callback registered below, freed only
    // after both registrations are removed
    let callback = unsafe { &*(observer as *const ChangeCallback) };
    if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
        log::error!("Layout change handler panicked");
    }
}

/// Registered observer pointer, moved into the subscription's cancel action
struct Observer(*mut ChangeCallback);

// SAFETY: the pointee is Send + Sync; the pointer is only dereferenced by the
// notification callback and freed once by the cancel action
unsafe impl Send for Observer {}

fn names() -> [ffi::CFStringRef; 2] {
    // SAFETY: reading framework-provided constant CFStrings
    unsafe {
        [
            ffi::kTISNotifySelectedKeyboardInputSourceChanged,
            ffi::kTISNotifyEnabledKeyboardInputSourcesChanged,
        ]
    }
}

impl LayoutNotifier for InputSourceNotifier {
    fn subscribe(&self, on_change: ChangeCallback) -> Result<Subscription, LayoutError> {
        // SAFETY: plain getter for the process-wide center
        let center = unsafe { ffi::CFNotificationCenterGetDistributedCenter() };
        if center.is_null() {
            return Err(LayoutError::Subscribe(
                "distributed notification center unavailable".to_string(),
            ));
        }

        let observer = Observer(Box::into_raw(Box::new(on_change)));
        for name in names() {
            // SAFETY: observer stays valid until removed in the cancel action
            unsafe {
                ffi::CFNotificationCenterAddObserver(
                    center,
                    observer.0 as *const c_void,
                    on_notification,
                    name,
                    std::ptr::null(),
                    ffi::CFNotificationSuspensionBehaviorDeliverImmediately,
                );
            }
        }
        log::debug!("Subscribed to keyboard input source notifications");

        Ok(Subscription::new(move || {
            let observer = observer;
            // SAFETY: removing the registrations made above, then freeing the
            // callback exactly once
            unsafe {
                let center = ffi::CFNotificationCenterGetDistributedCenter();
                for name in names() {
                    ffi::CFNotificationCenterRemoveObserver(
                        center,
                        observer.0 as *const c_void,
                        name,
                        std::ptr::null(),
                    );
                }
                drop(Box::from_raw(observer.0));
            }
            log::debug!("Unsubscribed from keyboard input source notifications");
        }))
    }
}
