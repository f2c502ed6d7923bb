// Keyswap macOS FFI
// Raw bindings to CoreGraphics event taps, CoreFoundation run loops and
// notifications, Carbon text input sources and ApplicationServices trust

#![allow(non_upper_case_globals, non_snake_case, dead_code)]

use std::ffi::c_void;

// === Types ===

pub type CFTypeRef = *const c_void;
pub type CFAllocatorRef = *const c_void;
pub type CFStringRef = *const c_void;
pub type CFDataRef = *const c_void;
pub type CFDictionaryRef = *const c_void;
pub type CFMachPortRef = *mut c_void;
pub type CFRunLoopRef = *mut c_void;
pub type CFRunLoopSourceRef = *mut c_void;
pub type CFRunLoopMode = CFStringRef;
pub type CFNotificationCenterRef = *mut c_void;
pub type CFIndex = isize;
pub type CFTimeInterval = f64;

pub type CGEventRef = *mut c_void;
pub type CGEventTapProxy = *mut c_void;
pub type CGEventMask = u64;
pub type CGEventType = u32;
pub type CGEventField = u32;

pub type TISInputSourceRef = *mut c_void;
pub type UCKeyboardLayout = c_void;
pub type UniChar = u16;
pub type UniCharCount = usize;
pub type OSStatus = i32;

pub type CGEventTapCallBack = extern "C" fn(
    proxy: CGEventTapProxy,
    event_type: CGEventType,
    event: CGEventRef,
    user_info: *mut c_void,
) -> CGEventRef;

pub type CFNotificationCallback = extern "C" fn(
    center: CFNotificationCenterRef,
    observer: *mut c_void,
    name: CFStringRef,
    object: *const c_void,
    user_info: CFDictionaryRef,
);

/// Opaque callback tables; only their addresses are passed
#[repr(C)]
pub struct CFDictionaryCallBacks {
    _private: [u8; 0],
}

// === Constants ===

pub const kCGSessionEventTap: u32 = 1;
pub const kCGHeadInsertEventTap: u32 = 0;
pub const kCGEventTapOptionDefault: u32 = 0;

pub const kCGKeyboardEventKeycode: CGEventField = 9;
pub const kCGKeyboardEventKeyboardType: CGEventField = 10;

pub const kUCKeyActionDown: u16 = 0;
/// `1 << kUCKeyTranslateNoDeadKeysBit`
pub const kUCKeyTranslateNoDeadKeysMask: u32 = 1;

pub const CFNotificationSuspensionBehaviorDeliverImmediately: CFIndex = 4;

pub const noErr: OSStatus = 0;

// === FFI Declarations - CoreGraphics ===

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    pub fn CGEventTapCreate(
        tap: u32,
        place: u32,
        options: u32,
        events_of_interest: CGEventMask,
        callback: CGEventTapCallBack,
        user_info: *mut c_void,
    ) -> CFMachPortRef;

    pub fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);

    pub fn CGEventTapIsEnabled(tap: CFMachPortRef) -> bool;

    pub fn CGEventGetIntegerValueField(event: CGEventRef, field: CGEventField) -> i64;

    pub fn CGEventSetIntegerValueField(event: CGEventRef, field: CGEventField, value: i64);
}

// === FFI Declarations - CoreFoundation ===

#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    pub fn CFRelease(obj: CFTypeRef);

    pub fn CFDataGetBytePtr(data: CFDataRef) -> *const u8;

    pub fn CFDictionaryCreate(
        allocator: CFAllocatorRef,
        keys: *const *const c_void,
        values: *const *const c_void,
        num_values: CFIndex,
        key_callbacks: *const CFDictionaryCallBacks,
        value_callbacks: *const CFDictionaryCallBacks,
    ) -> CFDictionaryRef;

    pub fn CFMachPortCreateRunLoopSource(
        allocator: CFAllocatorRef,
        port: CFMachPortRef,
        order: CFIndex,
    ) -> CFRunLoopSourceRef;

    pub fn CFMachPortInvalidate(port: CFMachPortRef);

    pub fn CFRunLoopGetCurrent() -> CFRunLoopRef;

    pub fn CFRunLoopAddSource(rl: CFRunLoopRef, source: CFRunLoopSourceRef, mode: CFRunLoopMode);

    pub fn CFRunLoopRemoveSource(
        rl: CFRunLoopRef,
        source: CFRunLoopSourceRef,
        mode: CFRunLoopMode,
    );

    pub fn CFRunLoopRunInMode(
        mode: CFRunLoopMode,
        seconds: CFTimeInterval,
        return_after_source_handled: bool,
    ) -> i32;

    pub fn CFRunLoopStop(rl: CFRunLoopRef);

    pub fn CFNotificationCenterGetDistributedCenter() -> CFNotificationCenterRef;

    pub fn CFNotificationCenterAddObserver(
        center: CFNotificationCenterRef,
        observer: *const c_void,
        callback: CFNotificationCallback,
        name: CFStringRef,
        object: *const c_void,
        suspension_behavior: CFIndex,
    );

    pub fn CFNotificationCenterRemoveObserver(
        center: CFNotificationCenterRef,
        observer: *const c_void,
        name: CFStringRef,
        object: *const c_void,
    );

    pub static kCFRunLoopCommonModes: CFRunLoopMode;
    pub static kCFRunLoopDefaultMode: CFRunLoopMode;
    pub static kCFBooleanTrue: CFTypeRef;
    pub static kCFTypeDictionaryKeyCallBacks: CFDictionaryCallBacks;
    pub static kCFTypeDictionaryValueCallBacks: CFDictionaryCallBacks;
}

// === FFI Declarations - Carbon (Text Input Sources) ===

#[link(name = "Carbon", kind = "framework")]
extern "C" {
    pub fn TISCopyCurrentKeyboardLayoutInputSource() -> TISInputSourceRef;

    pub fn TISGetInputSourceProperty(source: TISInputSourceRef, key: CFStringRef) -> *mut c_void;

    pub fn LMGetKbdType() -> u8;

    pub fn UCKeyTranslate(
        key_layout: *const UCKeyboardLayout,
        virtual_key_code: u16,
        key_action: u16,
        modifier_key_state: u32,
        keyboard_type: u32,
        key_translate_options: u32,
        dead_key_state: *mut u32,
        max_string_length: UniCharCount,
        actual_string_length: *mut UniCharCount,
        unicode_string: *mut UniChar,
    ) -> OSStatus;

    pub static kTISPropertyUnicodeKeyLayoutData: CFStringRef;
    pub static kTISNotifySelectedKeyboardInputSourceChanged: CFStringRef;
    pub static kTISNotifyEnabledKeyboardInputSourcesChanged: CFStringRef;
}

// === FFI Declarations - ApplicationServices (Accessibility) ===

#[link(name = "ApplicationServices", kind = "framework")]
extern "C" {
    pub fn AXIsProcessTrusted() -> bool;

    pub fn AXIsProcessTrustedWithOptions(options: CFDictionaryRef) -> bool;

    pub static kAXTrustedCheckOptionPrompt: CFStringRef;
}
