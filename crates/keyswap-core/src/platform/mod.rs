// Keyswap Platform Module
// OS bindings; only macOS provides a global key event filter

#[cfg(target_os = "macos")]
pub mod macos;
