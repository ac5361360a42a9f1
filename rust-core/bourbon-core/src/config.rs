//! # Configuration
//!
//! `settings.toml` loading with per-field defaults and environment
//! overrides.
//!
//! Every section carries `#[serde(default)]`, so a partial file (or no file
//! at all) yields a complete [`Config`]. Overrides are applied after the
//! file is read and take precedence over it.

use crate::database::Dialect;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "settings.toml";

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Application identity
    pub app: AppConfig,
    /// HTTP server
    pub server: ServerSettings,
    /// Database connection
    pub database: DatabaseConfig,
    /// Installed applications
    pub apps: AppsConfig,
    /// Middleware stack
    pub middleware: MiddlewareConfig,
    /// Logging
    pub logging: LoggingConfig,
    /// Security settings
    pub security: SecurityConfig,
    /// Migration generator paths
    pub migrations: MigrationsConfig,
}

/// `[app]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application name
    pub name: String,
    /// Environment name (development, production, ...)
    pub env: String,
    /// Debug mode
    pub debug: bool,
    /// Secret used to verify JWTs on protected routes
    pub secret_key: String,
    /// Display timezone
    pub timezone: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "bourbon-app".to_string(),
            env: "development".to_string(),
            debug: true,
            secret_key: "change-me-in-production".to_string(),
            timezone: "UTC".to_string(),
        }
    }
}

/// `[server]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Read timeout in seconds
    pub read_timeout: u64,
    /// Write timeout in seconds
    pub write_timeout: u64,
    /// Graceful shutdown drain timeout in seconds
    pub shutdown_timeout: u64,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            read_timeout: 30,
            write_timeout: 30,
            shutdown_timeout: 30,
            max_body_size: 1024 * 1024,
        }
    }
}

impl ServerSettings {
    /// `host:port` string
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Shutdown timeout as a `Duration`
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}

/// `[database]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite`, `postgres` or `mysql`
    pub driver: String,
    /// Full connection URL; when set it wins over the individual fields
    pub url: Option<String>,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Database name
    pub name: String,
    /// User name
    pub user: String,
    /// Password
    pub password: String,
    /// SQLite file path
    pub path: String,
    /// Maximum pool size
    pub max_connections: u32,
    /// Postgres `sslmode`
    pub ssl_mode: String,
    /// MySQL connection charset
    pub charset: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: "sqlite".to_string(),
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            name: "bourbon.db".to_string(),
            user: String::new(),
            password: String::new(),
            path: "storage/database.db".to_string(),
            max_connections: 25,
            ssl_mode: "disable".to_string(),
            charset: "utf8mb4".to_string(),
        }
    }
}

impl DatabaseConfig {
    /// Dialect selected by `driver`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for unsupported drivers.
    pub fn dialect(&self) -> Result<Dialect> {
        match &self.url {
            Some(url) if url.starts_with("sqlite:") => Ok(Dialect::Sqlite),
            Some(url) if url.starts_with("postgres") => Ok(Dialect::Postgres),
            Some(url) if url.starts_with("mysql:") || url.starts_with("mariadb:") => {
                Ok(Dialect::MySql)
            }
            _ => Dialect::from_driver(&self.driver),
        }
    }

    /// Connection URL for `DatabasePool::connect`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for unsupported drivers.
    pub fn url(&self) -> Result<String> {
        if let Some(url) = self.url.as_ref().filter(|u| !u.is_empty()) {
            return Ok(url.clone());
        }

        Ok(match self.dialect()? {
            Dialect::Sqlite => format!("sqlite:{}?mode=rwc", self.path),
            Dialect::Postgres => format!(
                "postgres://{}{}:{}/{}?sslmode={}",
                self.credentials(),
                self.host,
                self.port,
                self.name,
                self.ssl_mode
            ),
            Dialect::MySql => format!(
                "mysql://{}{}:{}/{}?charset={}",
                self.credentials(),
                self.host,
                self.port,
                self.name,
                self.charset
            ),
        })
    }

    fn credentials(&self) -> String {
        match (self.user.is_empty(), self.password.is_empty()) {
            (true, _) => String::new(),
            (false, true) => format!("{}@", self.user),
            (false, false) => format!("{}:{}@", self.user, self.password),
        }
    }
}

/// `[apps]` section
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppsConfig {
    /// Installed application names, in registration order
    pub installed: Vec<String>,
}

/// `[middleware]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MiddlewareConfig {
    /// Middleware names enabled by default, outermost first
    pub enabled: Vec<String>,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            enabled: vec!["Logger".to_string(), "Recovery".to_string()],
        }
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human readable
    Text,
}

/// Log file rotation period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    /// One file per hour
    Hourly,
    /// One file per day
    #[default]
    Daily,
    /// One file per ISO week
    Weekly,
    /// A single file
    None,
}

/// `[logging]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level (`trace`..`error`); `RUST_LOG` overrides it
    pub level: String,
    /// Console format
    pub format: LogFormat,
    /// `stdout` or `stderr`
    pub output: String,
    /// Also write JSON logs to files under `storage_path`
    pub file_logging: bool,
    /// Log file directory
    pub storage_path: PathBuf,
    /// Log file rotation
    pub rotation: Rotation,
    /// Store 5xx responses and panics in the `error_logs` table
    pub store_errors_db: bool,
    /// Size in megabytes at which the active log file is rolled; 0 disables
    pub max_size: u64,
    /// Days a rolled file is kept; 0 keeps them regardless of age
    pub max_age: u64,
    /// Rolled files kept; 0 keeps them all
    pub max_backups: usize,
    /// Gzip rolled files
    pub compress: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            output: "stdout".to_string(),
            file_logging: false,
            storage_path: PathBuf::from("storage/logs"),
            rotation: Rotation::Daily,
            store_errors_db: false,
            max_size: 100,
            max_age: 30,
            max_backups: 10,
            compress: true,
        }
    }
}

/// `[security]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Hosts allowed to reach the server
    pub allowed_hosts: Vec<String>,
    /// Origins sent by the CORS middleware
    pub cors_origins: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: vec!["localhost".to_string(), "127.0.0.1".to_string()],
            cors_origins: vec!["*".to_string()],
        }
    }
}

/// `[migrations]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MigrationsConfig {
    /// Directory holding one sub-directory per application
    pub apps_dir: PathBuf,
    /// Persisted model state used for change detection
    pub state_path: PathBuf,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            apps_dir: PathBuf::from("apps"),
            state_path: PathBuf::from(".bourbon/migration_state.json"),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file exists but cannot be read or
    /// parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a TOML file without environment overrides
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file exists but cannot be read or
    /// parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        Self::from_toml(&text).map_err(|e| Error::Config {
            message: format!("{}: {e}", path.display()),
        })
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` on malformed TOML or mistyped values.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config {
            message: e.to_string(),
        })
    }

    /// Apply environment overrides through `lookup`
    ///
    /// Empty values are ignored, as are values that fail to parse.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(host) = get("BOURBON_SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("BOURBON_SERVER_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(driver) = get("BOURBON_DATABASE_DRIVER") {
            self.database.driver = driver;
        }
        if let Some(url) = get("BOURBON_DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(level) = get("BOURBON_LOGGING_LEVEL") {
            self.logging.level = level;
        }
        if let Some(host) = get("DB_HOST") {
            self.database.host = host;
        }
        if let Some(port) = get("DB_PORT").and_then(|p| p.parse().ok()) {
            self.database.port = port;
        }
        if let Some(name) = get("DB_NAME") {
            self.database.name = name;
        }
        if let Some(user) = get("DB_USER") {
            self.database.user = user;
        }
        if let Some(password) = get("DB_PASSWORD") {
            self.database.password = password;
        }
        if let Some(debug) = get("DEBUG") {
            self.app.debug = debug == "true";
        }
        if let Some(secret) = get("SECRET_KEY") {
            self.app.secret_key = secret;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.app.name, "bourbon-app");
        assert_eq!(config.server.address(), "0.0.0.0:8000");
        assert_eq!(config.middleware.enabled, vec!["Logger", "Recovery"]);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(
            config.migrations.state_path,
            PathBuf::from(".bourbon/migration_state.json")
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [app]
            name = "shop"

            [apps]
            installed = ["users", "orders"]

            [logging]
            format = "text"
            rotation = "hourly"
            "#,
        )
        .unwrap();

        assert_eq!(config.app.name, "shop");
        assert!(config.app.debug);
        assert_eq!(config.apps.installed, vec!["users", "orders"]);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.logging.rotation, Rotation::Hourly);
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_malformed_toml_is_error() {
        assert!(matches!(
            Config::from_toml("[server]\nport = \"eighty\""),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_file(dir.path().join("settings.toml")).unwrap();
        assert_eq!(config.database.driver, "sqlite");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("DB_HOST", "db.internal"),
            ("DB_PORT", "6543"),
            ("DB_USER", "app"),
            ("DB_PASSWORD", "pw"),
            ("DEBUG", "false"),
            ("BOURBON_DATABASE_DRIVER", "postgres"),
            ("BOURBON_SERVER_PORT", "not-a-port"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_overrides(|k| env.get(k).map(ToString::to_string));

        assert!(!config.app.debug);
        assert_eq!(config.server.port, 8000);
        assert_eq!(
            config.database.url().unwrap(),
            "postgres://app:pw@db.internal:6543/bourbon.db?sslmode=disable"
        );
    }

    #[test]
    fn test_sqlite_url() {
        let config = DatabaseConfig::default();
        assert_eq!(config.url().unwrap(), "sqlite:storage/database.db?mode=rwc");
        assert_eq!(config.dialect().unwrap(), Dialect::Sqlite);

        let explicit = DatabaseConfig {
            url: Some("postgres://localhost/app".to_string()),
            ..DatabaseConfig::default()
        };
        assert_eq!(explicit.dialect().unwrap(), Dialect::Postgres);
    }

    #[test]
    fn test_mysql_url() {
        let config = Config::from_toml(
            r#"
            [database]
            driver = "mysql"
            host = "db"
            port = 3306
            name = "shop"
            user = "root"
            password = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(config.database.dialect().unwrap(), Dialect::MySql);
        assert_eq!(
            config.database.url().unwrap(),
            "mysql://root:secret@db:3306/shop?charset=utf8mb4"
        );

        let explicit = DatabaseConfig {
            url: Some("mysql://localhost/app".to_string()),
            ..DatabaseConfig::default()
        };
        assert_eq!(explicit.dialect().unwrap(), Dialect::MySql);
    }

    #[test]
    fn test_log_retention_settings() {
        let defaults = LoggingConfig::default();
        assert_eq!(
            (defaults.max_size, defaults.max_age, defaults.max_backups, defaults.compress),
            (100, 30, 10, true)
        );

        let config = Config::from_toml(
            r#"
            [logging]
            max_size = 5
            max_backups = 2
            compress = false
            "#,
        )
        .unwrap();
        assert_eq!(config.logging.max_size, 5);
        assert_eq!(config.logging.max_age, 30);
        assert_eq!(config.logging.max_backups, 2);
        assert!(!config.logging.compress);
    }
}
