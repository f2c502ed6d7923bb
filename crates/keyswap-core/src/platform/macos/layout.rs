// Keyswap macOS Layout Source
// Reads the active keyboard layout through Text Input Sources

use crate::key::KeyCode;
use crate::layout::{KeyTranslator, LayoutError, LayoutSource};
use crate::platform::macos::ffi;

/// Longest output UCKeyTranslate may write for one key
const MAX_OUTPUT: usize = 4;

/// The keyboard layout currently selected in the menu bar input menu
#[derive(Debug, Default, Clone, Copy)]
pub struct InputSourceLayout;

impl InputSourceLayout {
    pub fn new() -> Self {
        Self
    }
}

/// Retained input source with its Unicode layout data.
///
/// The layout pointer stays valid while the input source is retained.
struct UnicodeLayout {
    source: ffi::TISInputSourceRef,
    layout: *const ffi::UCKeyboardLayout,
    keyboard_type: u32,
}

impl KeyTranslator for UnicodeLayout {
    fn translate(&self, code: KeyCode) -> Option<String> {
        let mut dead_key_state: u32 = 0;
        let mut length: ffi::UniCharCount = 0;
        let mut buffer = [0 as ffi::UniChar; MAX_OUTPUT];

        // SAFETY: layout points into CFData owned by the retained source;
        // the out pointers reference live stack locals sized as passed.
        let status = unsafe {
            ffi::UCKeyTranslate(
                self.layout,
                code.code(),
                ffi::kUCKeyActionDown,
                0,
                self.keyboard_type,
                ffi::kUCKeyTranslateNoDeadKeysMask,
                &mut dead_key_state,
                MAX_OUTPUT,
                &mut length,
                buffer.as_mut_ptr(),
            )
        };
        if status != ffi::noErr || length == 0 {
            return None;
        }
        String::from_utf16(&buffer[..length.min(MAX_OUTPUT)]).ok()
    }
}

impl Drop for UnicodeLayout {
    fn drop(&mut self) {
        // SAFETY: source was returned retained by TISCopy*
        unsafe { ffi::CFRelease(self.source as ffi::CFTypeRef) };
    }
}

impl LayoutSource for InputSourceLayout {
    fn load(&self) -> Result<Box<dyn KeyTranslator + '_>, LayoutError> {
        // SAFETY: plain TIS queries; every returned pointer is null-checked
        unsafe {
            let source = ffi::TISCopyCurrentKeyboardLayoutInputSource();
            if source.is_null() {
                return Err(LayoutError::Unavailable(
                    "no current keyboard layout input source".to_string(),
                ));
            }
            let data = ffi::TISGetInputSourceProperty(source, ffi::kTISPropertyUnicodeKeyLayoutData)
                as ffi::CFDataRef;
            if data.is_null() {
                ffi::CFRelease(source as ffi::CFTypeRef);
                return Err(LayoutError::Unavailable(
                    "input source has no Unicode key layout data".to_string(),
                ));
            }
            let layout = ffi::CFDataGetBytePtr(data) as *const ffi::UCKeyboardLayout;
            if layout.is_null() {
                ffi::CFRelease(source as ffi::CFTypeRef);
                return Err(LayoutError::Unavailable("empty key layout data".to_string()));
            }
            Ok(Box::new(UnicodeLayout {
                source,
                layout,
                keyboard_type: u32::from(ffi::LMGetKbdType()),
            }))
        }
    }
}
