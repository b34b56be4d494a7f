use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_PATH_ENV: &str = "PO_ALLOCATOR_CONFIG";
pub const API_URL_ENV: &str = "PO_ALLOCATOR_API_URL";
pub const TOKEN_ENV: &str = "PO_ALLOCATOR_TOKEN";
pub const TIMEOUT_ENV: &str = "PO_ALLOCATOR_TIMEOUT_SECS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    pub api_base_url: String,
    pub access_token: Option<String>,
    /// Upper bound on a single purchase-order call before the round is reported as timed out.
    pub request_timeout_secs: u64,
    pub send_idempotency_key: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api/".to_string(),
            access_token: None,
            request_timeout_secs: 30,
            send_idempotency_key: true,
        }
    }
}

impl AllocatorConfig {
    /// Defaults, then the config file if one exists, then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn config_path() -> Option<PathBuf> {
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Some(PathBuf::from(path)),
            None => dirs::config_dir().map(|dir| dir.join("po-allocator").join("config.json")),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(API_URL_ENV) {
            self.api_base_url = url;
        }
        if let Some(token) = lookup(TOKEN_ENV) {
            self.access_token = Some(token).filter(|t| !t.is_empty());
        }
        if let Some(raw) = lookup(TIMEOUT_ENV) {
            self.request_timeout_secs = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: TIMEOUT_ENV.to_string(),
                value: raw.clone(),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                key: "api_base_url".to_string(),
                value: self.api_base_url.clone(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "request_timeout_secs".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}
