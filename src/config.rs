use std::path::PathBuf;

use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::db::Backend;

/// Storage configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Which backend this handle talks to.
    /// TOML: `backend`. Default: `sqlite`.
    #[serde(default = "default_backend")]
    pub backend: Backend,

    /// Embedded backend settings (see `sqlite` table in storage.toml).
    #[serde(default)]
    pub sqlite: SqliteConfig,

    /// Networked backend settings (see `mysql` table in storage.toml).
    #[serde(default)]
    pub mysql: MySqlConfig,

    /// How long `close()` / re-`init()` waits for queued transactions to
    /// finish before carrying the un-started remainder over to the next
    /// worker. Clamped to 5 minutes.
    /// TOML: `transaction_drain_wait_ms`. Default: `20000`.
    #[serde(default = "default_drain_wait_ms")]
    pub transaction_drain_wait_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SqliteConfig {
    /// Database file path.
    /// TOML: `sqlite.path`. Default: `telemetry.db`.
    #[serde(default = "default_sqlite_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MySqlConfig {
    /// TOML: `mysql.host`. Default: `127.0.0.1`.
    #[serde(default = "default_mysql_host")]
    pub host: String,

    /// TOML: `mysql.port`. Default: `3306`.
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// TOML: `mysql.database`. Default: `playvault`.
    #[serde(default = "default_mysql_database")]
    pub database: String,

    /// TOML: `mysql.username`. Default: `root`.
    #[serde(default = "default_mysql_username")]
    pub username: String,

    /// TOML: `mysql.password`. Default: empty.
    #[serde(default)]
    pub password: String,

    /// Identity value used to name the connection pool in logs. Each handle
    /// carries its own; there is no process-wide counter.
    /// TOML: `mysql.pool_identity`. Default: `playvault-pool`.
    #[serde(default = "default_pool_identity")]
    pub pool_identity: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            sqlite: SqliteConfig::default(),
            mysql: MySqlConfig::default(),
            transaction_drain_wait_ms: default_drain_wait_ms(),
        }
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_sqlite_path(),
        }
    }
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            host: default_mysql_host(),
            port: default_mysql_port(),
            database: default_mysql_database(),
            username: default_mysql_username(),
            password: String::new(),
            pool_identity: default_pool_identity(),
        }
    }
}

const DEFAULT_CONFIG_FILE: &str = "storage.toml";

impl StorageConfig {
    /// Builds a Figment that merges defaults and a config TOML file.
    pub fn figment() -> Figment {
        let figment = Figment::new().merge(Serialized::defaults(StorageConfig::default()));
        if PathBuf::from(DEFAULT_CONFIG_FILE).is_file() {
            figment.merge(Toml::file(DEFAULT_CONFIG_FILE))
        } else {
            figment
        }
    }

    /// Loads configuration by merging defaults and `storage.toml` if present.
    pub fn from_optional_toml() -> Self {
        Self::figment().extract().unwrap_or_else(|err| {
            panic!("failed to extract configuration (defaults + optional storage.toml): {err}")
        })
    }

    /// Configuration for an embedded file-backed database.
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Sqlite,
            sqlite: SqliteConfig { path: path.into() },
            ..Self::default()
        }
    }

    /// Configuration for a networked pooled database.
    pub fn mysql(mysql: MySqlConfig) -> Self {
        Self {
            backend: Backend::MySql,
            mysql,
            ..Self::default()
        }
    }
}

fn default_backend() -> Backend {
    Backend::Sqlite
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("telemetry.db")
}

fn default_drain_wait_ms() -> u64 {
    20_000
}

fn default_mysql_host() -> String {
    "127.0.0.1".to_string()
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_mysql_database() -> String {
    "playvault".to_string()
}

fn default_mysql_username() -> String {
    "root".to_string()
}

fn default_pool_identity() -> String {
    "playvault-pool".to_string()
}
