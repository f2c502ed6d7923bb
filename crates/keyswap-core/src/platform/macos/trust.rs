// Keyswap macOS Trust Provider
// Accessibility permission through ApplicationServices

use std::ffi::c_void;

use crate::permission::TrustProvider;
use crate::platform::macos::ffi;

/// TCC accessibility trust of the running process
#[derive(Debug, Default, Clone, Copy)]
pub struct AccessibilityTrust;

impl AccessibilityTrust {
    pub fn new() -> Self {
        Self
    }
}

impl TrustProvider for AccessibilityTrust {
    fn is_trusted(&self) -> bool {
        // SAFETY: no arguments, no ownership transfer
        unsafe { ffi::AXIsProcessTrusted() }
    }

    fn request(&self) -> bool {
        // SAFETY: the dictionary is created with the CFType callbacks, passed
        // by reference, and released before returning.
        unsafe {
            let keys = [ffi::kAXTrustedCheckOptionPrompt as *const c_void];
            let values = [ffi::kCFBooleanTrue];
            let options = ffi::CFDictionaryCreate(
                std::ptr::null(),
                keys.as_ptr(),
                values.as_ptr(),
                1,
                &ffi::kCFTypeDictionaryKeyCallBacks,
                &ffi::kCFTypeDictionaryValueCallBacks,
            );
            let trusted = ffi::AXIsProcessTrustedWithOptions(options);
            if !options.is_null() {
                ffi::CFRelease(options);
            }
            trusted
        }
    }
}
