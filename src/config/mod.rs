//! Application configuration
//!
//! [`AppConfig`] is loaded from TOML and may be overridden from the
//! environment:
//!
//! - `SCHEMABASE_STORAGE_PATH`: directory of the sled store
//! - `SCHEMABASE_LOG`: default log level

pub mod error;

pub use error::{ConfigError, ConfigResult};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::logging::LoggingConfig;

pub const STORAGE_PATH_ENV: &str = "SCHEMABASE_STORAGE_PATH";
pub const LOG_LEVEL_ENV: &str = "SCHEMABASE_LOG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory of the sled store; `None` keeps everything in memory
    pub storage_path: Option<PathBuf>,
    /// Mount point of the administrative collections service
    pub admin_path: String,
    /// Whether the administrative service is mounted at all
    pub admin_enabled: bool,
    /// Upper bound (and default) for `$limit`
    pub max_limit: Option<u64>,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_path: None,
            admin_path: "/collections".to_string(),
            admin_enabled: true,
            max_limit: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads a TOML file and applies environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var(STORAGE_PATH_ENV) {
            if !path.is_empty() {
                self.storage_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !self.admin_path.starts_with('/') {
            return Err(ConfigError::validation(format!(
                "admin_path must start with '/', got '{}'",
                self.admin_path
            )));
        }
        if self.max_limit == Some(0) {
            return Err(ConfigError::validation("max_limit must be positive"));
        }
        self.logging.validate()
    }

    #[must_use]
    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_max_limit(mut self, limit: u64) -> Self {
        self.max_limit = Some(limit);
        self
    }
}
