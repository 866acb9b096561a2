// Configuration File Support
//
// TOML configuration for the credit-gate service with environment variable
// overrides. The default file lives in the XDG config directory:
// ~/.config/credit-gate/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::credits::{LedgerTable, QuotaWindow, TimestampKind};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// HTTP server configuration
    pub server: ServerConfig,

    /// Free-tier quota rules
    pub quota: QuotaConfig,

    /// Fast quota store backend
    pub store: StoreConfig,

    /// Usage ledger backend
    pub ledger: LedgerConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl LoggingConfig {
    /// Convert the level string to a tracing::Level
    pub fn tracing_level(&self) -> Result<tracing::Level> {
        self.level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Header carrying the authenticated user id
    pub identity_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            identity_header: "x-user-id".to_string(),
        }
    }
}

/// Free-tier quota rules
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QuotaConfig {
    /// Window length in seconds
    pub window_secs: u64,

    /// Credits per window granted to free-tier callers
    pub free_credits: u64,

    /// Bound on a fast store peek, in milliseconds
    pub store_timeout_ms: u64,

    /// Bound on a ledger query, in milliseconds
    pub ledger_timeout_ms: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            window_secs: 7 * 24 * 60 * 60,
            free_credits: 1,
            store_timeout_ms: 2000,
            ledger_timeout_ms: 2000,
        }
    }
}

impl QuotaConfig {
    pub fn window(&self) -> Result<QuotaWindow> {
        QuotaWindow::new(Duration::from_secs(self.window_secs))
            .ok_or_else(|| anyhow::anyhow!("Quota window must be > 0 seconds"))
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger_timeout_ms)
    }
}

/// Fast quota store backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend type (memory, redis)
    pub backend: String,

    /// Redis URL (if backend is redis)
    pub redis_url: Option<String>,

    /// Prefix of the per-user counter keys
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            redis_url: None,
            key_prefix: "credits:free:".to_string(),
        }
    }
}

/// Usage ledger backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LedgerConfig {
    /// Backend type (memory, postgres)
    pub backend: String,

    /// Postgres connection string (if backend is postgres)
    pub database_url: Option<String>,

    /// Table holding one row per credit-consuming event
    pub table: String,

    /// Column with the user id
    pub user_column: String,

    /// Column with the event timestamp
    pub timestamp_column: String,

    /// SQL type of the timestamp column (timestamp, timestamptz)
    pub timestamp_type: String,

    /// Maximum pool connections
    pub max_connections: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            database_url: None,
            table: "stories".to_string(),
            user_column: "user_id".to_string(),
            timestamp_column: "created_at".to_string(),
            timestamp_type: "timestamp".to_string(),
            max_connections: 5,
        }
    }
}

impl LedgerConfig {
    pub fn ledger_table(&self) -> Result<LedgerTable> {
        let kind = TimestampKind::parse(&self.timestamp_type)?;
        Ok(LedgerTable::new(&self.table, &self.user_column, &self.timestamp_column)?
            .with_timestamp_kind(kind))
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to serve /metrics
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// Missing files yield defaults. Environment overrides are applied and
    /// the result is validated either way.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/credit-gate/config.toml` on Linux/Mac
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "credit-gate", "credit-gate") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config").join("credit-gate").join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - CREDIT_GATE_LOG_LEVEL
    /// - CREDIT_GATE_LOG_FORMAT
    /// - CREDIT_GATE_PORT
    /// - CREDIT_GATE_WINDOW_SECS
    /// - CREDIT_GATE_FREE_CREDITS
    /// - CREDIT_GATE_REDIS_URL (also selects the redis backend)
    /// - CREDIT_GATE_DATABASE_URL (also selects the postgres backend)
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("CREDIT_GATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("CREDIT_GATE_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Ok(port) = std::env::var("CREDIT_GATE_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }

        if let Ok(secs) = std::env::var("CREDIT_GATE_WINDOW_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                self.quota.window_secs = secs;
            }
        }
        if let Ok(credits) = std::env::var("CREDIT_GATE_FREE_CREDITS") {
            if let Ok(credits) = credits.parse::<u64>() {
                self.quota.free_credits = credits;
            }
        }

        if let Ok(url) = std::env::var("CREDIT_GATE_REDIS_URL") {
            self.store.backend = "redis".to_string();
            self.store.redis_url = Some(url);
        }
        if let Ok(url) = std::env::var("CREDIT_GATE_DATABASE_URL") {
            self.ledger.backend = "postgres".to_string();
            self.ledger.database_url = Some(url);
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}. Must be one of: trace, debug, info, warn, error", self.logging.level),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!("Invalid log format: {}. Must be one of: json, pretty, compact", self.logging.format),
        }

        if self.server.identity_header.trim().is_empty() {
            anyhow::bail!("Identity header must not be empty");
        }

        self.quota.window()?;
        if self.quota.free_credits == 0 {
            anyhow::bail!("Free credits per window must be > 0");
        }
        if self.quota.store_timeout_ms == 0 || self.quota.ledger_timeout_ms == 0 {
            anyhow::bail!("Backend timeouts must be > 0 ms");
        }

        match self.store.backend.to_lowercase().as_str() {
            "memory" => {}
            "redis" => {
                if self.store.redis_url.is_none() {
                    anyhow::bail!("Store uses the redis backend but has no redis_url configured");
                }
            }
            _ => anyhow::bail!("Invalid store backend: {}. Must be 'memory' or 'redis'", self.store.backend),
        }

        match self.ledger.backend.to_lowercase().as_str() {
            "memory" => {}
            "postgres" => {
                if self.ledger.database_url.is_none() {
                    anyhow::bail!("Ledger uses the postgres backend but has no database_url configured");
                }
                if self.ledger.max_connections == 0 {
                    anyhow::bail!("Ledger max_connections must be > 0");
                }
            }
            _ => anyhow::bail!("Invalid ledger backend: {}. Must be 'memory' or 'postgres'", self.ledger.backend),
        }
        self.ledger.ledger_table()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.identity_header, "x-user-id");
        assert_eq!(config.quota.window_secs, 604_800);
        assert_eq!(config.quota.free_credits, 1);
        assert_eq!(config.store.backend, "memory");
        assert_eq!(config.ledger.table, "stories");
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_config_validation_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_window() {
        let mut config = Config::default();
        config.quota.window_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_credits() {
        let mut config = Config::default();
        config.quota.free_credits = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_redis_without_url() {
        let mut config = Config::default();
        config.store.backend = "redis".to_string();
        assert!(config.validate().is_err());

        config.store.redis_url = Some("redis://127.0.0.1/".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_postgres_without_url() {
        let mut config = Config::default();
        config.ledger.backend = "postgres".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_bad_table_name() {
        let mut config = Config::default();
        config.ledger.table = "stories where 1=1".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ledger_timestamp_type() {
        let mut config = Config::default();
        assert_eq!(
            config.ledger.ledger_table().unwrap().timestamp_kind,
            TimestampKind::Naive
        );

        config.ledger.timestamp_type = "timestamptz".to_string();
        assert_eq!(
            config.ledger.ledger_table().unwrap().timestamp_kind,
            TimestampKind::Zoned
        );

        config.ledger.timestamp_type = "interval".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_unknown_backend() {
        let mut config = Config::default();
        config.store.backend = "memcached".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.quota.free_credits, Config::default().quota.free_credits);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[quota]
window_secs = 86400
free_credits = 3

[ledger]
table = "app.stories"
"#
        )
        .unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.quota.window_secs, 86_400);
        assert_eq!(config.quota.free_credits, 3);
        assert_eq!(config.ledger.table, "app.stories");
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "quota = [not toml").unwrap();
        assert!(Config::load_from_path(file.path()).is_err());
    }

    #[test]
    fn test_log_level() {
        let mut config = Config::default();
        assert_eq!(config.logging.tracing_level().unwrap(), tracing::Level::INFO);

        config.logging.level = "WARN".to_string();
        assert_eq!(config.logging.tracing_level().unwrap(), tracing::Level::WARN);
    }
}
