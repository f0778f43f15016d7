//! Session configuration, loadable from TOML.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Knobs that shape how chains name identifiers and what gets logged.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct OgmConfig {
    /// Identifier used by model-anchored chains (`Model.all`).
    pub identifier: String,
    /// Prefix of the first association identifier off an entity anchor.
    pub association_prefix: String,
    /// Suffix appended to the parent identifier for preloaded children.
    pub preload_suffix: String,
    /// Emit every rendered query at debug level.
    pub log_queries: bool,
    /// Primary key property for models that do not declare one.
    pub primary_key: Option<String>,
}

impl Default for OgmConfig {
    fn default() -> Self {
        Self {
            identifier: "n".into(),
            association_prefix: "result".into(),
            preload_suffix: "_child".into(),
            log_queries: true,
            primary_key: None,
        }
    }
}

impl OgmConfig {
    /// Parses a TOML document; absent keys keep their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: None,
            source,
        })
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })
    }

    /// Serializes the configuration back to TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })
    }
}

/// Failures while loading or writing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File that was requested.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The TOML was malformed or had wrongly typed keys.
    #[error("failed to parse config{}: {source}", path.as_ref().map(|p| format!(" {}", p.display())).unwrap_or_default())]
    Parse {
        /// File that was parsed, if any.
        path: Option<PathBuf>,
        /// Underlying parse error.
        source: toml::de::Error,
    },
    /// The configuration could not be serialized.
    #[error("failed to serialize config: {source}")]
    Serialize {
        /// Underlying serialization error.
        source: toml::ser::Error,
    },
}
