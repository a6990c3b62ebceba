//! Service configuration loaded from environment variables.
//!
//! All settings come from the environment, optionally seeded from a
//! `.env` file via `dotenvy`. Unset keys fall back to defaults suited to
//! a local run; leaving `DATABASE_URL` or `REDIS_URL` unset selects the
//! in-memory repository or queue respectively.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `LISTEN_ADDR` is not a socket address.
    #[error("invalid LISTEN_ADDR {value:?}: {source}")]
    ListenAddr {
        /// Raw value.
        value: String,
        /// Parse failure.
        source: std::net::AddrParseError,
    },
    /// A key holds a value outside its accepted set.
    #[error("invalid {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
    },
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    /// Developer machine; enables the `X-User-Id` header.
    Local,
    /// Shared development or staging.
    Development,
    /// Production.
    Production,
}

impl FromStr for AppEnv {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "development" | "dev" | "staging" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(()),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Object storage layout.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for private objects (exports, imports).
    pub root: PathBuf,
    /// Directory, relative to `root`, holding temp uploads.
    pub temp_dir: String,
    /// Directory, relative to `root`, holding promoted public files.
    pub public_dir: String,
    /// Base URL under which `public_dir` is served.
    pub public_base_url: String,
}

/// Top-level configuration.
///
/// Loaded once at startup via [`AppConfig::from_env`].
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Socket address to bind the HTTP server to.
    pub listen_addr: SocketAddr,
    /// PostgreSQL connection string; `None` selects the in-memory repository.
    pub database_url: Option<String>,
    /// Maximum number of database connections in the pool.
    pub database_max_connections: u32,
    /// Minimum idle connections in the pool.
    pub database_min_connections: u32,
    /// Timeout in seconds for acquiring a database connection.
    pub database_connect_timeout_secs: u64,
    /// Apply pending migrations at startup.
    pub database_run_migrations: bool,
    /// Redis connection string; `None` selects the in-process queue.
    pub redis_url: Option<String>,
    /// Maximum tasks a worker runs at once.
    pub worker_concurrency: usize,
    /// Run a worker pool inside the HTTP server process.
    pub worker_embedded: bool,
    /// Seconds between scheduled overdue sweeps; `0` disables them.
    pub overdue_check_interval_secs: u64,
    /// Object storage layout.
    pub storage: StorageConfig,
    /// Allowed CORS origins; empty means permissive.
    pub cors_allowed_origins: Vec<String>,
    /// Deployment environment.
    pub app_env: AppEnv,
    /// Grace period for in-flight work on shutdown.
    pub shutdown_timeout_secs: u64,
    /// Log output format.
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `LISTEN_ADDR`, `APP_ENV` or `LOG_FORMAT`
    /// is set to an unparsable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let raw_addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let listen_addr = raw_addr
            .parse()
            .map_err(|source| ConfigError::ListenAddr {
                value: raw_addr.clone(),
                source,
            })?;

        let app_env = match non_empty("APP_ENV") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue {
                    key: "APP_ENV",
                    value,
                })?,
            None => AppEnv::Local,
        };

        let log_format = match non_empty("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "LOG_FORMAT",
                    value: other.to_string(),
                });
            }
        };

        let cors_allowed_origins = non_empty("CORS_ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let redis_url = non_empty("REDIS_URL");
        let worker_embedded = parse_env_bool("WORKER_EMBEDDED", redis_url.is_none());

        Ok(Self {
            listen_addr,
            database_url: non_empty("DATABASE_URL"),
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10),
            database_min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 2),
            database_connect_timeout_secs: parse_env("DATABASE_CONNECT_TIMEOUT_SECS", 5),
            database_run_migrations: parse_env_bool("DATABASE_RUN_MIGRATIONS", true),
            redis_url,
            worker_concurrency: parse_env("WORKER_CONCURRENCY", 10).max(1),
            worker_embedded,
            overdue_check_interval_secs: parse_env("OVERDUE_CHECK_INTERVAL_SECS", 3600),
            storage: StorageConfig {
                root: PathBuf::from(
                    non_empty("STORAGE_ROOT").unwrap_or_else(|| "./storage".to_string()),
                ),
                temp_dir: non_empty("STORAGE_TEMP_DIR").unwrap_or_else(|| "tmp".to_string()),
                public_dir: non_empty("STORAGE_PUBLIC_DIR")
                    .unwrap_or_else(|| "public".to_string()),
                public_base_url: non_empty("STORAGE_PUBLIC_BASE_URL")
                    .unwrap_or_else(|| "http://localhost:3000/public".to_string()),
            },
            cors_allowed_origins,
            app_env,
            shutdown_timeout_secs: parse_env("SHUTDOWN_TIMEOUT_SECS", 10),
            log_format,
        })
    }

    /// Returns `true` when the `X-User-Id` development header is honoured.
    #[must_use]
    pub fn allows_user_id_header(&self) -> bool {
        self.app_env == AppEnv::Local
    }
}

/// Reads a variable, treating an empty value as unset.
fn non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().map(|v| v.to_ascii_lowercase()).as_deref() {
        Some("true" | "1") => true,
        Some("false" | "0") => false,
        _ => default,
    }
}
