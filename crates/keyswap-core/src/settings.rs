// Keyswap Settings Module
// User-editable runtime settings loaded from TOML

use std::path::{Path, PathBuf};

use crate::rules::FileStore;

/// Default interval between main-loop drains of deferred work
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Settings for keyswap
///
/// Loaded from a TOML file (default: ~/.config/keyswap/settings.toml).
/// Rules and the persisted enable flag are not here; they live in the
/// key-value store under `storage_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Directory of the durable key-value store
    storage_dir: Option<PathBuf>,

    /// Startup override of the persisted enable flag
    remap_enabled: Option<bool>,

    /// Default log filter, e.g. "info" or "keyswap_core=debug"
    log_level: Option<String>,

    /// How often the main loop drains deferred work
    poll_interval_ms: u64,

    /// Path to the settings file, if one was read
    source_path: Option<PathBuf>,
}

/// Errors that can occur when loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("Invalid setting value: {0}")]
    InvalidValue(String),
}

/// TOML representation for deserializing settings
#[derive(Debug, Clone, serde::Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SettingsToml {
    #[serde(default)]
    storage: Option<StorageSettings>,

    #[serde(default)]
    remap: Option<RemapSettings>,

    #[serde(default)]
    logging: Option<LoggingSettings>,

    #[serde(default)]
    runtime: Option<RuntimeSettings>,
}

#[derive(Debug, Clone, serde::Deserialize, Default)]
struct StorageSettings {
    #[serde(default)]
    dir: Option<PathBuf>,
}

#[derive(Debug, Clone, serde::Deserialize, Default)]
struct RemapSettings {
    #[serde(default)]
    enabled: Option<toml::Value>,
}

#[derive(Debug, Clone, serde::Deserialize, Default)]
struct LoggingSettings {
    #[serde(default)]
    level: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize, Default)]
struct RuntimeSettings {
    #[serde(default)]
    poll_interval_ms: Option<i64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

impl Settings {
    /// Create settings with every value at its default
    pub fn new() -> Self {
        Self {
            storage_dir: None,
            remap_enabled: None,
            log_level: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            source_path: None,
        }
    }

    /// Load settings from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(&path)?;
        let mut settings = Self::from_toml(&content)?;
        settings.source_path = Some(path.as_ref().to_path_buf());
        Ok(settings)
    }

    /// Load settings from TOML string
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let toml_settings: SettingsToml =
            toml::from_str(content).map_err(|e| SettingsError::TomlParse(e.to_string()))?;

        let mut settings = Self::new();

        if let Some(storage) = toml_settings.storage {
            settings.storage_dir = storage.dir.map(|dir| expand_home(&dir));
        }

        if let Some(remap) = toml_settings.remap {
            if let Some(value) = remap.enabled {
                settings.remap_enabled = Some(parse_bool_value(&value)?);
            }
        }

        if let Some(logging) = toml_settings.logging {
            settings.log_level = logging.level.filter(|level| !level.trim().is_empty());
        }

        if let Some(runtime) = toml_settings.runtime {
            if let Some(ms) = runtime.poll_interval_ms {
                if ms <= 0 {
                    return Err(SettingsError::InvalidValue(format!(
                        "poll_interval_ms must be positive, got {}",
                        ms
                    )));
                }
                settings.poll_interval_ms = ms as u64;
            }
        }

        Ok(settings)
    }

    /// Get the default settings path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("keyswap").join("settings.toml"))
    }

    /// Load from default location (~/.config/keyswap/settings.toml)
    pub fn load_default() -> Result<Self, SettingsError> {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::from_file(path);
            }
        }
        // Return default settings if file doesn't exist
        Ok(Self::new())
    }

    /// Load from `path` if given, else from the default location
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::load_default(),
        }
    }

    /// Directory of the durable key-value store
    pub fn storage_dir(&self) -> Option<PathBuf> {
        self.storage_dir.clone().or_else(FileStore::default_dir)
    }

    /// Startup override of the persisted enable flag
    pub fn remap_enabled(&self) -> Option<bool> {
        self.remap_enabled
    }

    /// Default log filter, if configured
    pub fn log_level(&self) -> Option<&str> {
        self.log_level.as_deref()
    }

    /// Interval between main-loop drains
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    /// File the settings were loaded from
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }
}

/// Expand a leading `~` to the home directory
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Parse a TOML value as a boolean
fn parse_bool_value(value: &toml::Value) -> Result<bool, SettingsError> {
    match value {
        toml::Value::Boolean(b) => Ok(*b),
        toml::Value::Integer(1) => Ok(true),
        toml::Value::Integer(0) => Ok(false),
        toml::Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(SettingsError::InvalidValue(format!(
                "Cannot convert '{}' to boolean",
                s
            ))),
        },
        _ => Err(SettingsError::InvalidValue(format!(
            "Cannot convert {:?} to boolean",
            value
        ))),
    }
}

/// Create default settings content for a new installation
pub fn default_settings_content() -> &'static str {
    r#"# Keyswap Settings
# Place this file at: ~/.config/keyswap/settings.toml

[storage]
# Where swap rules and the enable flag are kept
# dir = "~/.config/keyswap/state"

[remap]
# Force remapping on or off at startup (the last saved state is used if unset)
# enabled = true

[logging]
# Default log filter; RUST_LOG and --verbose take precedence
level = "info"

[runtime]
# How often deferred work (new keyboard types, tap recovery) is processed
poll_interval_ms = 250
"#
}
