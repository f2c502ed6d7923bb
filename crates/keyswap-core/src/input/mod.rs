// Keyswap Input Layer
// Intercepted event model and keyboard hardware type tracking

mod event;
pub mod keyboard_type;

pub use event::{raw, EventKind, EventMask, KeyEvent, SyntheticEvent};
pub use keyboard_type::{keyboard_label, KeyboardType, KeyboardTypeRegistry};
