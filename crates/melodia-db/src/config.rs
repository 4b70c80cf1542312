//! # Database Configuration
//!
//! Settings consumed by the pool and the SQLite backend.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     MELODIA_DB_PATH=/srv/music/library.db                              │
//! │     MELODIA_MAX_CONNECTIONS=8                                          │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/melodia/melodia.toml (Linux)                             │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "/srv/music/library.db"
//! max_connections = 5
//! min_connections = 1
//! connect_timeout_ms = 30000
//! acquire_timeout_ms = 10000
//! busy_timeout_ms = 5000
//! run_migrations = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/path/to/library.db")
///     .max_connections(5)
///     .min_connections(1);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of leased connections (and of idle connections kept).
    /// Default: 5
    pub max_connections: u32,

    /// Connections opened eagerly when the pool is created.
    /// Default: 1
    pub min_connections: u32,

    /// Upper bound for opening one new connection.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// How long `acquire` waits for a lease when the pool is at capacity.
    /// Default: 10 seconds
    pub acquire_timeout: Duration,

    /// SQLite busy/lock wait, fixed per connection at creation.
    /// Default: 5 seconds
    pub busy_timeout: Duration,

    /// Whether to run migrations on open.
    /// Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a new database configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(10),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the minimum number of connections.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets how long `acquire` may wait at full capacity.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Sets the SQLite busy timeout.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets whether to run migrations on open.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// Every SQLite connection to `:memory:` is its own database, so the
    /// pool is pinned to a single connection.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(1),
            run_migrations: true,
        }
    }

    /// Returns true for the `:memory:` database.
    pub fn is_in_memory(&self) -> bool {
        self.database_path == Path::new(":memory:")
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (melodia.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> DbResult<Self> {
        let mut file = ConfigFile::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading database config from file");
                let contents = std::fs::read_to_string(&path)?;
                file = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        let mut config = file.database.into_config();
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DbResult<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(DbError::Config("database path is empty".into()));
        }

        if self.max_connections == 0 {
            return Err(DbError::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(DbError::Config(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }

        if self.is_in_memory() && self.max_connections > 1 {
            return Err(DbError::Config(
                "an in-memory database supports a single connection".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("MELODIA_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database_path = PathBuf::from(path);
        }

        if let Ok(max) = std::env::var("MELODIA_MAX_CONNECTIONS") {
            match max.parse::<u32>() {
                Ok(max) => self.max_connections = max,
                Err(_) => warn!(value = %max, "Ignoring invalid MELODIA_MAX_CONNECTIONS"),
            }
        }

        if let Ok(min) = std::env::var("MELODIA_MIN_CONNECTIONS") {
            match min.parse::<u32>() {
                Ok(min) => self.min_connections = min,
                Err(_) => warn!(value = %min, "Ignoring invalid MELODIA_MIN_CONNECTIONS"),
            }
        }

        if let Ok(ms) = std::env::var("MELODIA_BUSY_TIMEOUT_MS") {
            match ms.parse::<u64>() {
                Ok(ms) => self.busy_timeout = Duration::from_millis(ms),
                Err(_) => warn!(value = %ms, "Ignoring invalid MELODIA_BUSY_TIMEOUT_MS"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "melodia", "melodia")
            .map(|dirs| dirs.config_dir().join("melodia.toml"))
    }

    /// Returns the default database file path.
    fn default_database_path() -> PathBuf {
        directories::ProjectDirs::from("org", "melodia", "melodia")
            .map(|dirs| dirs.data_dir().join("library.db"))
            .unwrap_or_else(|| PathBuf::from("library.db"))
    }
}

// =============================================================================
// File Format
// =============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    database: DatabaseSection,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct DatabaseSection {
    path: Option<PathBuf>,
    max_connections: u32,
    min_connections: u32,
    connect_timeout_ms: u64,
    acquire_timeout_ms: u64,
    busy_timeout_ms: u64,
    run_migrations: bool,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        let defaults = DbConfig::new("");
        DatabaseSection {
            path: None,
            max_connections: defaults.max_connections,
            min_connections: defaults.min_connections,
            connect_timeout_ms: defaults.connect_timeout.as_millis() as u64,
            acquire_timeout_ms: defaults.acquire_timeout.as_millis() as u64,
            busy_timeout_ms: defaults.busy_timeout.as_millis() as u64,
            run_migrations: defaults.run_migrations,
        }
    }
}

impl DatabaseSection {
    fn into_config(self) -> DbConfig {
        DbConfig::new(self.path.unwrap_or_else(DbConfig::default_database_path))
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .acquire_timeout(Duration::from_millis(self.acquire_timeout_ms))
            .busy_timeout(Duration::from_millis(self.busy_timeout_ms))
            .run_migrations(self.run_migrations)
    }
}
