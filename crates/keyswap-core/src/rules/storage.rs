// Keyswap Durable Storage
// Small key-value store backing the rule list and the remap-enabled flag

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

/// Storage key of the rule list blob
pub const RULES_KEY: &str = "settings.keyboard.rules";
/// Storage key of the remap-enabled flag
pub const REMAP_ENABLED_KEY: &str = "settings.keyboard.remapEnabled";

/// Errors from the durable store
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Durable key-value persistence
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `Ok(None)` if the key was never written
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Read a JSON boolean, `default` if missing or unreadable
    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or(default),
            Ok(None) => default,
            Err(e) => {
                log::warn!("Failed to read {}: {}", key, e);
                default
            }
        }
    }

    /// Write a JSON boolean
    fn set_bool(&self, key: &str, value: bool) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(&value)?;
        self.set(key, &bytes)
    }
}

/// In-process store, for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys written
    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    /// Check if nothing has been written
    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.values.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// Directory-backed store: one `<key>.json` file per key.
///
/// Writes go to a temporary file that is renamed over the target, so a crash
/// mid-write leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Use `dir` as the store root. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Default location (~/.config/keyswap/state)
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("keyswap").join("state"))
    }

    /// Store root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        let target = self.path_for(key);
        let tmp = target.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(value)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &target)?;
        Ok(())
    }
}
