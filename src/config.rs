//! Repository configuration.
//!
//! Loaded from TOML with serde defaults for every field; command-line
//! flags override file values. The default data directory follows XDG:
//! `$XDG_DATA_HOME/exprepo/` (falling back to `~/.local/share/exprepo/`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration for a [`Repository`](crate::repository::Repository).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub ontology: OntologyConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory for the durable store. `None` keeps everything in memory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Upper bound on each classifier call, in milliseconds. `0` disables
    /// the timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OntologyConfig {
    /// TOML file of precoordinated concepts loaded at open.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl RepositoryConfig {
    /// A memory-only configuration with default timeouts.
    pub fn memory_only() -> Self {
        Self::default()
    }

    /// A configuration persisting to `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreConfig {
                data_dir: Some(data_dir.into()),
            },
            ..Default::default()
        }
    }

    pub fn with_ontology(mut self, path: impl Into<PathBuf>) -> Self {
        self.ontology.path = Some(path.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.classifier.timeout_ms = timeout_ms;
        self
    }

    /// Load a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&content, path)
    }

    /// Parse config text; `origin` is only used in error messages.
    pub fn from_toml(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid {
            message: format!("failed to serialize config: {e}"),
        })
    }
}

/// `$XDG_DATA_HOME/exprepo`, or `~/.local/share/exprepo`.
pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        if !xdg.is_empty() {
            return Ok(PathBuf::from(xdg).join("exprepo"));
        }
    }
    let home = std::env::var("HOME").map_err(|_| ConfigError::Invalid {
        message: "cannot determine a data directory: neither XDG_DATA_HOME nor HOME is set"
            .into(),
    })?;
    Ok(PathBuf::from(home).join(".local/share/exprepo"))
}
