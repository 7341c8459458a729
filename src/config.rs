//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/tender.sqlite"
//!
//! [matching]
//! norm_version = 1
//! cache_ttl_days = 30
//!
//! [import]
//! timeout_secs = 600
//!
//! [logging]
//! filter = "info,sqlx=warn"
//! ```
//!
//! Only `[db]` is required.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest cache lifetime accepted from configuration (100 years).
pub const MAX_CACHE_TTL_DAYS: i64 = 36_500;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    /// Version of the title normalization that produced cache keys.
    #[serde(default = "default_norm_version")]
    pub norm_version: i64,
    #[serde(default = "default_cache_ttl_days")]
    pub cache_ttl_days: i64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            norm_version: default_norm_version(),
            cache_ttl_days: default_cache_ttl_days(),
        }
    }
}

impl MatchingConfig {
    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.cache_ttl_days.clamp(1, MAX_CACHE_TTL_DAYS))
    }
}

fn default_norm_version() -> i64 {
    1
}
fn default_cache_ttl_days() -> i64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ImportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "info,sqlx=warn".to_string()
}

impl Config {
    /// Configuration pointing at `db_path` with every other section defaulted.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            matching: MatchingConfig::default(),
            import: ImportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.matching.norm_version < 1 {
        anyhow::bail!("matching.norm_version must be >= 1");
    }

    if !(1..=MAX_CACHE_TTL_DAYS).contains(&config.matching.cache_ttl_days) {
        anyhow::bail!(
            "matching.cache_ttl_days must be between 1 and {}",
            MAX_CACHE_TTL_DAYS
        );
    }

    if config.import.timeout_secs == 0 {
        anyhow::bail!("import.timeout_secs must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_sections() {
        let config = parse_config("[db]\npath = \"./data/t.sqlite\"\n").unwrap();
        assert_eq!(config.db.path, PathBuf::from("./data/t.sqlite"));
        assert_eq!(config.matching.norm_version, 1);
        assert_eq!(config.matching.cache_ttl_days, 30);
        assert_eq!(config.import.timeout(), Duration::from_secs(600));
        assert_eq!(config.logging.filter, "info,sqlx=warn");
    }

    #[test]
    fn rejects_zero_ttl() {
        let err = parse_config(
            "[db]\npath = \"t.sqlite\"\n\n[matching]\ncache_ttl_days = 0\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("cache_ttl_days"));
    }

    #[test]
    fn rejects_ttl_beyond_limit() {
        let err = parse_config(
            "[db]\npath = \"t.sqlite\"\n\n[matching]\ncache_ttl_days = 200000000000\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("cache_ttl_days"));

        let mut config = Config::with_db_path("t.sqlite");
        config.matching.cache_ttl_days = i64::MAX;
        assert_eq!(
            config.matching.cache_ttl(),
            chrono::Duration::days(MAX_CACHE_TTL_DAYS)
        );
    }

    #[test]
    fn rejects_missing_db_section() {
        assert!(parse_config("[matching]\nnorm_version = 2\n").is_err());
    }
}
