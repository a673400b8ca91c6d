use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Result, anyhow};

/// Environment variable that overrides the configured API base URL
pub const API_URL_ENV: &str = "CLINIDESK_API_URL";

/// Longest token lifetime honoured; anything outside `(0, MAX]` falls back to the default
pub const MAX_TOKEN_TTL_DAYS: i64 = 3650;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub poll_interval_ms: u64,
    pub refresh_close_delay_ms: u64,
    pub access_token_ttl_hours: i64,
    pub refresh_token_ttl_days: i64,
    pub request_timeout_secs: u64,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".to_string(),
            poll_interval_ms: 3000,
            refresh_close_delay_ms: 800,
            access_token_ttl_hours: 24,
            refresh_token_ttl_days: 7,
            request_timeout_secs: 30,
            log_filter: "clinidesk=info".to_string(),
        }
    }

    /// Load the user config (defaults if absent), then apply env overrides.
    /// On first run the defaults are written out so there is a file to edit.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        let first_run = !config_path.exists();
        let mut config = Self::load_from(&config_path)?;

        if first_run {
            if let Err(e) = config.save() {
                tracing::warn!(path = %config_path.display(), error = %e, "could not write default config");
            }
        }

        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                config.api_base_url = url;
            }
        }

        Ok(config)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, config_content)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn refresh_close_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_close_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn access_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::try_hours(self.access_token_ttl_hours)
            .filter(token_ttl_in_range)
            .unwrap_or_else(|| chrono::Duration::hours(Self::new().access_token_ttl_hours))
    }

    pub fn refresh_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::try_days(self.refresh_token_ttl_days)
            .filter(token_ttl_in_range)
            .unwrap_or_else(|| chrono::Duration::days(Self::new().refresh_token_ttl_days))
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("clinidesk").join("config.json"))
    }

    /// Directory for the persisted session and the log file
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow!("Could not determine data directory"))?;

        Ok(data_dir.join("clinidesk"))
    }
}

fn token_ttl_in_range(ttl: &chrono::Duration) -> bool {
    *ttl > chrono::Duration::zero() && *ttl <= chrono::Duration::days(MAX_TOKEN_TTL_DAYS)
}
