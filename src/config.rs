//! Runtime configuration.
//!
//! Loaded from `gradewatch.yml` when present, otherwise built from defaults.
//! Individual fields can be overridden through environment variables so the
//! service can run in a container without a config file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

fn default_portal_url() -> String {
    "https://cecce.myontarioedu.ca/aspen".to_string()
}

fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}

fn default_db_path() -> String {
    "gradewatch.db".to_string()
}

fn default_poll_interval_secs() -> u64 {
    600
}

fn default_element_wait_secs() -> u64 {
    15
}

fn default_reply_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_portal_url")]
    pub portal_url: String,
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Seconds between poll cycles.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Bound on each wait for a portal UI element.
    #[serde(default = "default_element_wait_secs")]
    pub element_wait_secs: u64,
    /// Bound on each wait for a user's reply during setup.
    #[serde(default = "default_reply_timeout_secs")]
    pub reply_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            portal_url: default_portal_url(),
            webdriver_url: default_webdriver_url(),
            db_path: default_db_path(),
            poll_interval_secs: default_poll_interval_secs(),
            element_wait_secs: default_element_wait_secs(),
            reply_timeout_secs: default_reply_timeout_secs(),
        }
    }
}

impl Config {
    /// Load config from the given YAML file, falling back to defaults when
    /// the file is missing, then apply environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path))?;
            serde_yaml::from_str(&content).with_context(|| "Failed to parse config YAML")?
        } else {
            Self::default()
        };

        if let Ok(url) = env::var("GRADEWATCH_PORTAL_URL") {
            config.portal_url = url;
        }
        if let Ok(url) = env::var("GRADEWATCH_WEBDRIVER_URL") {
            config.webdriver_url = url;
        }
        if let Ok(path) = env::var("GRADEWATCH_DB_PATH") {
            config.db_path = path;
        }
        if let Ok(secs) = env::var("GRADEWATCH_POLL_INTERVAL_SECS") {
            config.poll_interval_secs = secs
                .parse()
                .context("GRADEWATCH_POLL_INTERVAL_SECS must be an integer")?;
        }

        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn element_wait(&self) -> Duration {
        Duration::from_secs(self.element_wait_secs)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: Config = serde_yaml::from_str("portal_url: https://portal.example/aspen").unwrap();
        assert_eq!(config.portal_url, "https://portal.example/aspen");
        assert_eq!(config.poll_interval_secs, 600);
        assert_eq!(config.element_wait_secs, 15);
        assert_eq!(config.reply_timeout_secs, 300);
    }
}
