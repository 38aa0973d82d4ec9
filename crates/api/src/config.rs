//! Service configuration from environment variables

use std::path::PathBuf;

use config::{Config, ConfigError, Environment, Map};
use serde::Deserialize;

/// Weights used when `MODEL_PATH` is unset
pub const DEFAULT_MODEL_PATH: &str = "models/elacare_cardamom_model.mpk";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5001";
/// 16 MiB
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Environment variables the service reads
const ENV_KEYS: [&str; 3] = ["MODEL_PATH", "BIND_ADDR", "MAX_UPLOAD_BYTES"];

/// Server configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AppConfig {
    /// Weights record to load at startup (`MODEL_PATH`)
    pub model_path: PathBuf,
    /// Listen address (`BIND_ADDR`)
    pub bind_addr: String,
    /// Request body cap in bytes (`MAX_UPLOAD_BYTES`)
    pub max_upload_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl AppConfig {
    /// Read the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars = std::env::vars()
            .filter(|(key, _)| ENV_KEYS.contains(&key.as_str()))
            .collect();
        Self::from_vars(vars)
    }

    /// Build from an explicit variable map, falling back to defaults
    pub fn from_vars(vars: Map<String, String>) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("model_path", DEFAULT_MODEL_PATH)?
            .set_default("bind_addr", DEFAULT_BIND_ADDR)?
            .set_default("max_upload_bytes", DEFAULT_MAX_UPLOAD_BYTES as i64)?
            .add_source(Environment::default().source(Some(vars)))
            .build()?
            .try_deserialize()
    }
}
