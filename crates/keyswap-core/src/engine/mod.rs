// Keyswap Engine Module
// Global event filter lifecycle and the per-keystroke remap path

mod filter;
mod lifecycle;
mod tap;

pub use filter::{Disposition, RemapFilter};
pub use lifecycle::{EngineState, EngineStatus, RemapEngine};
pub use tap::{InstalledTap, NoTap, TapBackend, TapControl, TapError};
