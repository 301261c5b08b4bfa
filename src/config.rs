//! # Configuration Management
//!
//! Settings are layered from several sources, highest priority first:
//! 1. `HOST` / `PORT` environment variables (for deployment platforms)
//! 2. Environment variables with the `APP_` prefix, using `__` between
//!    sections and keys (`APP_SERVER__PORT=8000`, `APP_STORAGE__UPLOADS_DIR=/data`)
//! 3. An optional `config.toml` in the working directory
//! 4. The defaults in [`AppConfig::default`]
//!
//! ## Example `config.toml`:
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8000
//!
//! [rate_limit]
//! upload = ["5 per hour"]
//! ```

use crate::rate_limit::RateLimitItem;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub rate_limit: RateLimitConfig,
}

/// Where the HTTP server listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Locations of the persisted state.
///
/// ## Fields:
/// - `levels_file`: JSON array holding every level record
/// - `uploads_dir`: directory holding the audio blobs (created on startup)
/// - `max_upload_bytes`: largest accepted audio file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub levels_file: String,
    pub uploads_dir: String,
    pub max_upload_bytes: usize,
}

/// Per-route request ceilings, written like `"10 per hour"`.
///
/// Every route gets its own counters per client address. `default_limits`
/// applies to routes without an entry of their own (currently `/health`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub default_limits: Vec<String>,
    pub upload: Vec<String>,
    pub list_levels: Vec<String>,
    pub fetch_audio: Vec<String>,
    pub delete_level: Vec<String>,
    /// How often idle client entries are dropped from memory.
    pub cleanup_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 5000,
            },
            storage: StorageConfig {
                levels_file: "levels.json".to_string(),
                uploads_dir: "uploads".to_string(),
                max_upload_bytes: 50 * 1024 * 1024,
            },
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let limits =
            |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };
        Self {
            enabled: true,
            default_limits: limits(&["200 per day", "50 per hour"]),
            upload: limits(&["10 per hour"]),
            list_levels: limits(&["100 per hour"]),
            fetch_audio: limits(&["50 per hour"]),
            delete_level: limits(&["20 per hour"]),
            cleanup_interval_secs: 600,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings
            .build()?
            .try_deserialize()
            .context("invalid configuration")?;
        Ok(config)
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.storage.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        if self.rate_limit.cleanup_interval_secs == 0 {
            return Err(anyhow::anyhow!("Rate limit cleanup interval must be greater than 0"));
        }

        for (route, limits) in self.rate_limit.routes() {
            parse_limits(limits).with_context(|| format!("invalid rate limit for {route}"))?;
        }

        Ok(())
    }
}

impl RateLimitConfig {
    /// Each configured route name paired with its ceiling strings.
    pub fn routes(&self) -> [(&'static str, &[String]); 5] {
        [
            ("default", self.default_limits.as_slice()),
            ("upload", self.upload.as_slice()),
            ("list_levels", self.list_levels.as_slice()),
            ("fetch_audio", self.fetch_audio.as_slice()),
            ("delete_level", self.delete_level.as_slice()),
        ]
    }
}

/// Parse a list of ceiling strings such as `["200 per day", "50 per hour"]`.
pub fn parse_limits(limits: &[String]) -> Result<Vec<RateLimitItem>> {
    limits
        .iter()
        .map(|raw| raw.parse::<RateLimitItem>())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.storage.levels_file, "levels.json");
        assert_eq!(config.storage.uploads_dir, "uploads");
        assert!(config.rate_limit.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_rate_limits() {
        let limits = RateLimitConfig::default();
        assert_eq!(limits.upload, vec!["10 per hour"]);
        assert_eq!(limits.list_levels, vec!["100 per hour"]);
        assert_eq!(limits.fetch_audio, vec!["50 per hour"]);
        assert_eq!(limits.delete_level, vec!["20 per hour"]);
        assert_eq!(limits.default_limits, vec!["200 per day", "50 per hour"]);
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.storage.max_upload_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_limit_string_fails_validation() {
        let mut config = AppConfig::default();
        config.rate_limit.upload = vec!["lots per fortnight".to_string()];
        let err = config.validate().unwrap_err();
        assert!(format!("{err:#}").contains("upload"));
    }
}
