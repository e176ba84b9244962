#![allow(dead_code)]

use playvault::db::models::{Player, Server, Session};
use playvault::{Database, StorageConfig};
use tempfile::TempDir;
use uuid::Uuid;

/// Fresh file-backed database in its own temp directory. The directory must
/// outlive the handle, so it is returned alongside it.
pub fn temp_database() -> (TempDir, Database) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let db = Database::open(temp_config(&dir));
    (dir, db)
}

pub fn temp_config(dir: &TempDir) -> StorageConfig {
    let _ = tracing_subscriber::fmt::try_init();
    StorageConfig::sqlite(dir.path().join("telemetry.db"))
}

pub fn sample_server() -> Server {
    Server {
        uuid: Uuid::new_v4(),
        name: "Survival".to_string(),
        web_address: Some("https://example.com:8804".to_string()),
    }
}

pub fn sample_player(name: &str) -> Player {
    Player {
        uuid: Uuid::new_v4(),
        name: name.to_string(),
        registered: 1_700_000_000_000,
    }
}

pub fn sample_session(server: &Server, player: &Player, start: i64) -> Session {
    Session {
        player: player.uuid,
        server: server.uuid,
        session_start: start,
        session_end: Some(start + 600_000),
        mob_kills: 4,
        deaths: 1,
        afk_ms: 30_000,
    }
}
