//! Configuration loading
//!
//! Values are layered, later layers overriding earlier ones:
//! 1. Compiled defaults
//! 2. TOML config file (explicit path, else the platform config directory)
//! 3. `KSDB_*` environment variables
//! 4. Command-line flags (applied by the binary)

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::pagination::{DEFAULT_LIMIT, MAX_LIMIT};
use crate::{Error, Result};

/// Complete service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub tasks: TaskConfig,
    pub logging: LoggingConfig,
    pub api: ApiConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Socket address to bind, e.g. `127.0.0.1:8080`
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// SQLite database file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_data_dir().join("ksdb.db"),
        }
    }
}

/// Locations of stored media and staged uploads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub media_dir: PathBuf,
    pub upload_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data = default_data_dir();
        Self {
            media_dir: data.join("media"),
            upload_dir: data.join("uploads"),
        }
    }
}

/// Background task worker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaskConfig {
    /// Number of tasks executed at the same time
    pub concurrency: usize,
    /// Retries after the first failed attempt
    pub max_retries: u32,
    /// Base delay between retries; attempt `n` waits `n * retry_delay_ms`
    pub retry_delay_ms: u64,
    /// How often `media:prune` is scheduled; `0` disables the schedule
    pub prune_interval_secs: u64,
    /// Minimum age of an unreferenced file before it is pruned
    pub prune_grace_secs: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_retries: 3,
            retry_delay_ms: 1000,
            prune_interval_secs: 3600,
            prune_grace_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `ksdb_server=debug`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Collection paging limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    pub default_limit: i64,
    pub max_limit: i64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
        }
    }
}

impl Config {
    /// Load configuration from file and process environment
    ///
    /// `explicit` is the `--config` flag (or `KSDB_CONFIG`); it must exist.
    /// Without it, `<config_dir>/ksdb/config.toml` is used when present.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_file(explicit)? {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse TOML text; missing keys keep their defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Override values from `KSDB_*` variables
    ///
    /// `lookup` abstracts the environment so callers can supply their own.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("KSDB_ADDRESS") {
            self.server.address = v;
        }
        if let Some(v) = lookup("KSDB_DATABASE") {
            self.database.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("KSDB_MEDIA_DIR") {
            self.storage.media_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("KSDB_UPLOAD_DIR") {
            self.storage.upload_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("KSDB_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("KSDB_TASK_CONCURRENCY") {
            self.tasks.concurrency = parse_env("KSDB_TASK_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("KSDB_TASK_MAX_RETRIES") {
            self.tasks.max_retries = parse_env("KSDB_TASK_MAX_RETRIES", &v)?;
        }
        Ok(())
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<()> {
        self.server.address.parse::<SocketAddr>().map_err(|e| {
            Error::Config(format!(
                "server.address {:?} is not a socket address: {}",
                self.server.address, e
            ))
        })?;
        if self.tasks.concurrency == 0 {
            return Err(Error::Config("tasks.concurrency must be at least 1".to_string()));
        }
        if self.api.max_limit < 1 {
            return Err(Error::Config("api.max_limit must be at least 1".to_string()));
        }
        if self.api.default_limit < 0 || self.api.default_limit > self.api.max_limit {
            return Err(Error::Config(format!(
                "api.default_limit must be between 0 and {}",
                self.api.max_limit
            )));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} has invalid value {:?}", key, value)))
}

fn resolve_config_file(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        return Ok(Some(path.to_path_buf()));
    }

    Ok(dirs::config_dir()
        .map(|d| d.join("ksdb").join("config.toml"))
        .filter(|p| p.exists()))
}

/// OS-dependent default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("ksdb"))
        .unwrap_or_else(|| PathBuf::from("./ksdb_data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            address = "0.0.0.0:9000"

            [tasks]
            concurrency = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.server.address, "0.0.0.0:9000");
        assert_eq!(config.tasks.concurrency, 8);
        assert_eq!(config.tasks.max_retries, TaskConfig::default().max_retries);
        assert_eq!(config.api, ApiConfig::default());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = Config::from_toml("[server]\nport = 80\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::from_toml("[logging]\nlevel = \"warn\"\n").unwrap();
        let env: HashMap<&str, &str> = [
            ("KSDB_LOG_LEVEL", "debug"),
            ("KSDB_TASK_CONCURRENCY", "2"),
            ("KSDB_DATABASE", "/tmp/ksdb-test.db"),
        ]
        .into_iter()
        .collect();

        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.tasks.concurrency, 2);
        assert_eq!(config.database.path, PathBuf::from("/tmp/ksdb-test.db"));
    }

    #[test]
    fn test_invalid_env_number() {
        let mut config = Config::default();
        let err = config
            .apply_env(|key| (key == "KSDB_TASK_MAX_RETRIES").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_address() {
        let mut config = Config::default();
        config.server.address = "localhost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.tasks.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_missing_file() {
        let err = Config::load(Some(Path::new("/nonexistent/ksdb.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[storage]\nmedia_dir = \"/srv/media\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.storage.media_dir, PathBuf::from("/srv/media"));
        assert_eq!(config.storage.upload_dir, StorageConfig::default().upload_dir);
    }
}
