//! # Runtime Configuration
//!
//! Loaded once at startup from TOML. Every key is optional:
//!
//! ```toml
//! [database]
//! initial_capacity = 4096
//!
//! [serialization]
//! max_field_payload = 16777216
//!
//! [gc]
//! collect_on_destroy = false
//! ```

use std::path::Path;

use oroboros_reflect::ReadOptions;
use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading a [`RuntimeConfig`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {message}")]
    Io {
        /// Path that was opened.
        path: String,
        /// OS error text.
        message: String,
    },

    /// The document is not valid TOML or has values of the wrong type.
    #[error("invalid config: {0}")]
    Parse(String),
}

/// Object database sizing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Node slots reserved up front.
    pub initial_capacity: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 1024,
        }
    }
}

/// Field stream limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerializationConfig {
    /// A field length record above this is treated as corruption.
    pub max_field_payload: u64,
}

impl Default for SerializationConfig {
    fn default() -> Self {
        Self {
            max_field_payload: ReadOptions::default().max_field_payload,
        }
    }
}

/// Garbage collection behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GcConfig {
    /// Free storage in `destroy_object` instead of parking it until `collect_garbage`.
    pub collect_on_destroy: bool,
    /// Objects visited per `gc_tick` of an incremental collection.
    pub step_budget: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            collect_on_destroy: false,
            step_budget: 256,
        }
    }
}

/// Configuration of a [`CoreObjects`](crate::CoreObjects) runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Object database sizing.
    pub database: DatabaseConfig,
    /// Field stream limits.
    pub serialization: SerializationConfig,
    /// Garbage collection behaviour.
    pub gc: GcConfig,
}

impl RuntimeConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed documents or unknown keys.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|error| ConfigError::Parse(error.to_string()))
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise see
    /// [`RuntimeConfig::from_toml_str`].
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Field stream read limits derived from this config.
    #[must_use]
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            max_field_payload: self.serialization.max_field_payload,
        }
    }
}
