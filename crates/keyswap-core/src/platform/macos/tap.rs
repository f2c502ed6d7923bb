// Keyswap macOS Event Tap
// Session-level CGEventTap serviced by a dedicated run loop thread

use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::engine::{InstalledTap, RemapFilter, TapBackend, TapControl, TapError};
use crate::input::{EventKind, EventMask, KeyEvent, KeyboardType};
use crate::key::KeyCode;
use crate::platform::macos::ffi;

/// Run loop slice between checks of the stop flag, in seconds
const RUN_SLICE: ffi::CFTimeInterval = 1.0;

/// Installs CGEventTaps at the session level, ahead of other taps
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionTapBackend;

impl SessionTapBackend {
    pub fn new() -> Self {
        Self
    }
}

/// State reachable from the tap callback through `user_info`
struct TapContext {
    filter: Arc<RemapFilter>,
    port: AtomicPtr<c_void>,
}

impl TapControl for TapContext {
    fn reenable(&self) -> bool {
        let port = self.port.load(Ordering::Acquire);
        if port.is_null() {
            return false;
        }
        // SAFETY: port is non-null only while the tap thread owns a live port
        unsafe {
            ffi::CGEventTapEnable(port, true);
            ffi::CGEventTapIsEnabled(port)
        }
    }
}

/// Borrowed view of a CGEvent inside the callback
struct TapEvent {
    kind: EventKind,
    event: ffi::CGEventRef,
}

impl KeyEvent for TapEvent {
    fn kind(&self) -> EventKind {
        self.kind
    }

    fn key_code(&self) -> KeyCode {
        if self.event.is_null() {
            return KeyCode(u16::MAX);
        }
        // SAFETY: event is the live CGEvent passed to the callback
        let raw = unsafe { ffi::CGEventGetIntegerValueField(self.event, ffi::kCGKeyboardEventKeycode) };
        KeyCode(u16::try_from(raw).unwrap_or(u16::MAX))
    }

    fn set_key_code(&mut self, code: KeyCode) {
        if self.event.is_null() {
            return;
        }
        // SAFETY: event is the live CGEvent passed to the callback
        unsafe {
            ffi::CGEventSetIntegerValueField(
                self.event,
                ffi::kCGKeyboardEventKeycode,
                i64::from(code.code()),
            )
        };
    }

    fn keyboard_type(&self) -> KeyboardType {
        if self.event.is_null() {
            return KeyboardType(0);
        }
        // SAFETY: event is the live CGEvent passed to the callback
        KeyboardType(unsafe {
            ffi::CGEventGetIntegerValueField(self.event, ffi::kCGKeyboardEventKeyboardType)
        })
    }
}

extern "C" fn tap_callback(
    _proxy: ffi::CGEventTapProxy,
    event_type: ffi::CGEventType,
    event: ffi::CGEventRef,
    user_info: *mut c_void,
) -> ffi::CGEventRef {
    if user_info.is_null() {
        return event;
    }
    // SAFETY: user_info is the TapContext kept alive by the tap thread for as
    // long as the port exists
    let context = unsafe { &*(user_info as *const TapContext) };
    let mut tap_event = TapEvent {
        kind: EventKind::from_raw(event_type),
        event,
    };
    // Nothing may unwind into CoreGraphics; a panic passes the event through
    let _ = catch_unwind(AssertUnwindSafe(|| {
        context.filter.handle(&mut tap_event, context);
    }));
    event
}

/// CFRunLoopRef handed from the tap thread to its owner for stopping
struct RunLoop(ffi::CFRunLoopRef);

// SAFETY: CFRunLoopStop is documented thread-safe; nothing else is called
// on this pointer from other threads
unsafe impl Send for RunLoop {}

/// A live tap and the thread running its run loop
struct SessionTap {
    context: Arc<TapContext>,
    run_loop: RunLoop,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl InstalledTap for SessionTap {
    fn is_enabled(&self) -> bool {
        let port = self.context.port.load(Ordering::Acquire);
        // SAFETY: port is non-null only while the tap thread owns a live port
        !port.is_null() && unsafe { ffi::CGEventTapIsEnabled(port) }
    }
}

impl Drop for SessionTap {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        // SAFETY: the tap thread, and so its run loop, is alive until joined
        unsafe { ffi::CFRunLoopStop(self.run_loop.0) };
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Event tap thread panicked during shutdown");
            }
        }
    }
}

impl TapBackend for SessionTapBackend {
    fn install(
        &self,
        filter: Arc<RemapFilter>,
        mask: EventMask,
    ) -> Result<Box<dyn InstalledTap>, TapError> {
        let context = Arc::new(TapContext {
            filter,
            port: AtomicPtr::new(ptr::null_mut()),
        });
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread = {
            let context = context.clone();
            let stop = stop.clone();
            std::thread::Builder::new()
                .name("keyswap-tap".to_string())
                .spawn(move || run_tap(context, mask, stop, ready_tx))
                .map_err(|e| TapError::CreateFailed(e.to_string()))?
        };

        let run_loop = match ready_rx.recv() {
            Ok(Ok(run_loop)) => run_loop,
            Ok(Err(reason)) => {
                let _ = thread.join();
                return Err(TapError::CreateFailed(reason));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(TapError::CreateFailed("event tap thread exited".to_string()));
            }
        };
        log::debug!("Event tap thread started");

        Ok(Box::new(SessionTap {
            context,
            run_loop,
            stop,
            thread: Some(thread),
        }))
    }
}

/// Body of the tap thread: create the tap, service it, tear it down
fn run_tap(
    context: Arc<TapContext>,
    mask: EventMask,
    stop: Arc<AtomicBool>,
    ready: mpsc::Sender<Result<RunLoop, String>>,
) {
    // SAFETY: every CF object created here is released on this thread before
    // it exits, and context outlives the port that references it.
    unsafe {
        let port = ffi::CGEventTapCreate(
            ffi::kCGSessionEventTap,
            ffi::kCGHeadInsertEventTap,
            ffi::kCGEventTapOptionDefault,
            mask.bits(),
            tap_callback,
            Arc::as_ptr(&context) as *mut c_void,
        );
        if port.is_null() {
            let _ = ready.send(Err("CGEventTapCreate returned no port".to_string()));
            return;
        }

        let source = ffi::CFMachPortCreateRunLoopSource(ptr::null(), port, 0);
        if source.is_null() {
            ffi::CFMachPortInvalidate(port);
            ffi::CFRelease(port as ffi::CFTypeRef);
            let _ = ready.send(Err("could not create run loop source".to_string()));
            return;
        }

        let run_loop = ffi::CFRunLoopGetCurrent();
        ffi::CFRunLoopAddSource(run_loop, source, ffi::kCFRunLoopCommonModes);
        context.port.store(port, Ordering::Release);
        ffi::CGEventTapEnable(port, true);

        if ready.send(Ok(RunLoop(run_loop))).is_ok() {
            while !stop.load(Ordering::Acquire) {
                ffi::CFRunLoopRunInMode(ffi::kCFRunLoopDefaultMode, RUN_SLICE, false);
            }
        }

        ffi::CGEventTapEnable(port, false);
        context.port.store(ptr::null_mut(), Ordering::Release);
        ffi::CFRunLoopRemoveSource(run_loop, source, ffi::kCFRunLoopCommonModes);
        ffi::CFMachPortInvalidate(port);
        ffi::CFRelease(source as ffi::CFTypeRef);
        ffi::CFRelease(port as ffi::CFTypeRef);
    }
    log::debug!("Event tap thread stopped");
}
