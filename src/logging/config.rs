//! Logging configuration carried inside [`AppConfig`](crate::config::AppConfig).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{ConfigError, ConfigResult};

const LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level for every module
    pub level: String,
    /// Per-module overrides, e.g. `"schemabase::app" = "debug"`
    pub modules: BTreeMap<String, String>,
    /// Include timestamps in console output
    pub include_timestamp: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            modules: BTreeMap::new(),
            include_timestamp: true,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        let levels = std::iter::once(("level", &self.level))
            .chain(self.modules.iter().map(|(m, l)| (m.as_str(), l)));
        for (scope, level) in levels {
            if !LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
                return Err(ConfigError::validation(format!(
                    "invalid log level '{}' for '{}'",
                    level, scope
                )));
            }
        }
        Ok(())
    }

    /// Filter string in `env_logger` syntax: `level,module=level,...`
    pub fn filter_spec(&self) -> String {
        let mut parts = vec![self.level.to_ascii_lowercase()];
        parts.extend(
            self.modules
                .iter()
                .map(|(module, level)| format!("{}={}", module, level.to_ascii_lowercase())),
        );
        parts.join(",")
    }
}
