//! Configuration for the adquery CLI
//!
//! Example config:
//! ```toml
//! log_level = "debug"
//!
//! [directory]
//! url = "ldaps://dc.corp.com:636"
//! base_dn = "DC=corp,DC=com"
//! bind_dn = "svc-adquery@corp.com"
//! bind_password = "secret"
//!
//! [directory.referrals]
//! enabled = true
//! ```

use adquery_core::ClientConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// CLI configuration: the directory client settings plus logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdqueryConfig {
    #[serde(default)]
    pub directory: ClientConfig,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for AdqueryConfig {
    fn default() -> Self {
        Self {
            directory: ClientConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl AdqueryConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {}", path))
    }

    /// Build configuration from `ADQUERY_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self {
            directory: ClientConfig::from_env(),
            ..Default::default()
        };

        if let Ok(level) = std::env::var("ADQUERY_LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Directory settings with a masked password, for display
    pub fn redacted(&self) -> ClientConfig {
        let mut directory = self.directory.clone();
        if !directory.bind_password.is_empty() {
            directory.bind_password = "********".to_string();
        }
        directory
    }
}
