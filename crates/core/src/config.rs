//! Flat, typed model configuration lookup.
//!
//! Model metadata arrives as a single-level JSON object whose keys are
//! dotted paths (`vision.image_size`, `text.attention.sliding_window`, ...).
//! Getters either fall back to a documented default or, for the `require_*`
//! family, fail with [`ConfigError::Missing`].

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required config key `{0}`")]
    Missing(String),

    #[error("config key `{key}` has invalid type: expected {expected}")]
    InvalidType { key: String, expected: &'static str },

    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelConfig {
    values: Map<String, Value>,
}

impl ModelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Builder-style setter, mostly for tests and programmatic configs.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn uint(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        match self.values.get(key) {
            None => Ok(default),
            Some(v) => as_uint(key, v),
        }
    }

    pub fn require_uint(&self, key: &str) -> Result<u64, ConfigError> {
        let v = self
            .values
            .get(key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))?;
        as_uint(key, v)
    }

    pub fn float(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        match self.values.get(key) {
            None => Ok(default),
            Some(v) => v.as_f64().ok_or_else(|| ConfigError::InvalidType {
                key: key.to_string(),
                expected: "number",
            }),
        }
    }

    pub fn string(&self, key: &str) -> Result<Option<&str>, ConfigError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_str()
                .map(Some)
                .ok_or_else(|| ConfigError::InvalidType {
                    key: key.to_string(),
                    expected: "string",
                }),
        }
    }

    pub fn require_string(&self, key: &str) -> Result<&str, ConfigError> {
        self.string(key)?
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }
}

fn as_uint(key: &str, v: &Value) -> Result<u64, ConfigError> {
    v.as_u64().ok_or_else(|| ConfigError::InvalidType {
        key: key.to_string(),
        expected: "unsigned integer",
    })
}
