//! SQL DDL for the telemetry schema, per backend.
//!
//! Table creation is idempotent (`CREATE TABLE IF NOT EXISTS`) and always
//! describes the *latest* schema; patches in `patch_impl` bring databases
//! created by older versions up to it.

use crate::db::connection::Backend;

pub const SERVERS: &str = "servers";
pub const PLAYERS: &str = "players";
pub const SESSIONS: &str = "sessions";
pub const SERVER_METRICS: &str = "server_metrics";
pub const EXTENSION_VALUES: &str = "extension_values";

/// Column order used by the table dump/restore pair; parents before
/// children so a restore never references a server that is not there yet.
pub const COPY_ORDER: &[&str] = &[SERVERS, PLAYERS, SESSIONS, SERVER_METRICS, EXTENSION_VALUES];

pub fn table_columns(table: &str) -> &'static [&'static str] {
    match table {
        SERVERS => &["id", "uuid", "name", "web_address", "installed"],
        PLAYERS => &["id", "uuid", "name", "registered", "times_kicked"],
        SESSIONS => &[
            "id",
            "player_uuid",
            "server_uuid",
            "session_start",
            "session_end",
            "mob_kills",
            "deaths",
            "afk_ms",
        ],
        SERVER_METRICS => &[
            "id",
            "server_uuid",
            "date",
            "tps",
            "players_online",
            "free_disk_bytes",
        ],
        EXTENSION_VALUES => &["id", "plugin", "server_uuid", "value_name", "value_json"],
        _ => &[],
    }
}

const SQLITE_INIT: &str = "
CREATE TABLE IF NOT EXISTS servers (
    id INTEGER PRIMARY KEY NOT NULL,
    uuid TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    web_address TEXT NULL,
    installed BOOLEAN NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS players (
    id INTEGER PRIMARY KEY NOT NULL,
    uuid TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    registered BIGINT NOT NULL,
    times_kicked INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY NOT NULL,
    player_uuid TEXT NOT NULL,
    server_uuid TEXT NOT NULL,
    session_start BIGINT NOT NULL,
    session_end BIGINT NULL,
    mob_kills BIGINT NOT NULL DEFAULT 0,
    deaths BIGINT NOT NULL DEFAULT 0,
    afk_ms BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS server_metrics (
    id INTEGER PRIMARY KEY NOT NULL,
    server_uuid TEXT NOT NULL,
    date BIGINT NOT NULL,
    tps REAL NOT NULL,
    players_online INTEGER NOT NULL,
    free_disk_bytes BIGINT NOT NULL DEFAULT -1
);

CREATE TABLE IF NOT EXISTS extension_values (
    id INTEGER PRIMARY KEY NOT NULL,
    plugin TEXT NOT NULL,
    server_uuid TEXT NOT NULL,
    value_name TEXT NOT NULL,
    value_json TEXT NOT NULL,
    UNIQUE(plugin, server_uuid, value_name)
);
";

const MYSQL_INIT: &str = "
CREATE TABLE IF NOT EXISTS servers (
    id INT AUTO_INCREMENT NOT NULL,
    uuid VARCHAR(36) NOT NULL UNIQUE,
    name VARCHAR(100) NOT NULL,
    web_address VARCHAR(100) NULL,
    installed BOOLEAN NOT NULL DEFAULT 1,
    PRIMARY KEY (id)
);

CREATE TABLE IF NOT EXISTS players (
    id INT AUTO_INCREMENT NOT NULL,
    uuid VARCHAR(36) NOT NULL UNIQUE,
    name VARCHAR(36) NOT NULL,
    registered BIGINT NOT NULL,
    times_kicked INT NOT NULL DEFAULT 0,
    PRIMARY KEY (id)
);

CREATE TABLE IF NOT EXISTS sessions (
    id INT AUTO_INCREMENT NOT NULL,
    player_uuid VARCHAR(36) NOT NULL,
    server_uuid VARCHAR(36) NOT NULL,
    session_start BIGINT NOT NULL,
    session_end BIGINT NULL,
    mob_kills BIGINT NOT NULL DEFAULT 0,
    deaths BIGINT NOT NULL DEFAULT 0,
    afk_ms BIGINT NOT NULL DEFAULT 0,
    PRIMARY KEY (id)
);

CREATE TABLE IF NOT EXISTS server_metrics (
    id INT AUTO_INCREMENT NOT NULL,
    server_uuid VARCHAR(36) NOT NULL,
    date BIGINT NOT NULL,
    tps DOUBLE NOT NULL,
    players_online INT NOT NULL,
    free_disk_bytes BIGINT NOT NULL DEFAULT -1,
    PRIMARY KEY (id)
);

CREATE TABLE IF NOT EXISTS extension_values (
    id INT AUTO_INCREMENT NOT NULL,
    plugin VARCHAR(64) NOT NULL,
    server_uuid VARCHAR(36) NOT NULL,
    value_name VARCHAR(100) NOT NULL,
    value_json VARCHAR(500) NOT NULL,
    PRIMARY KEY (id),
    UNIQUE KEY extension_value_identity (plugin, server_uuid, value_name)
);
";

/// Individual `CREATE TABLE` statements for the backend, in declaration
/// order.
pub fn init_statements(backend: Backend) -> Vec<&'static str> {
    let ddl = match backend {
        Backend::Sqlite => SQLITE_INIT,
        Backend::MySql => MYSQL_INIT,
    };
    ddl.split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_copied_table_has_columns() {
        for table in COPY_ORDER {
            assert!(
                !table_columns(table).is_empty(),
                "no column list for {table}"
            );
        }
    }

    #[test]
    fn init_statements_split_cleanly() {
        for backend in [Backend::Sqlite, Backend::MySql] {
            let statements = init_statements(backend);
            assert_eq!(statements.len(), COPY_ORDER.len());
            assert!(
                statements
                    .iter()
                    .all(|s| s.starts_with("CREATE TABLE IF NOT EXISTS"))
            );
        }
    }
}
