mod common;

use async_trait::async_trait;
use playvault::db::index::CreateIndexesTransaction;
use playvault::db::models::{StoreSessionTransaction, RegisterPlayerTransaction, RegisterServerTransaction};
use playvault::{ConnectionLease, Database, DbError, Query, StorageConfig};
use sqlx::{ConnectOptions, Connection};
use sqlx::sqlite::SqliteConnectOptions;
use std::path::Path;

struct ColumnExistsQuery {
    table: &'static str,
    column: &'static str,
}

#[async_trait]
impl Query for ColumnExistsQuery {
    type Output = bool;

    async fn run(&self, lease: &mut ConnectionLease) -> Result<bool, DbError> {
        lease.has_column(self.table, self.column).await
    }
}

struct TableExistsQuery {
    table: &'static str,
}

#[async_trait]
impl Query for TableExistsQuery {
    type Output = bool;

    async fn run(&self, lease: &mut ConnectionLease) -> Result<bool, DbError> {
        lease.has_table(self.table).await
    }
}

/// Lays down the schema shape of an old release: sessions without the
/// AFK column, plus the retired schema_version bookkeeping table.
async fn create_legacy_database(path: &Path) {
    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .connect()
        .await
        .expect("failed to create legacy database");
    sqlx::query(
        "CREATE TABLE sessions (
            id INTEGER PRIMARY KEY NOT NULL,
            player_uuid TEXT NOT NULL,
            server_uuid TEXT NOT NULL,
            session_start BIGINT NOT NULL,
            session_end BIGINT NULL,
            mob_kills BIGINT NOT NULL DEFAULT 0,
            deaths BIGINT NOT NULL DEFAULT 0
        )",
    )
    .execute(&mut conn)
    .await
    .expect("failed to create legacy sessions table");
    sqlx::query("CREATE TABLE schema_version (version INTEGER NOT NULL)")
        .execute(&mut conn)
        .await
        .expect("failed to create legacy version table");
    conn.close().await.expect("failed to close legacy database");
}

#[tokio::test]
async fn init_upgrades_a_legacy_schema() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("telemetry.db");
    create_legacy_database(&path).await;

    let db = Database::open(StorageConfig::sqlite(&path));
    db.init().await.expect("init failed");

    assert!(
        db.query(&ColumnExistsQuery {
            table: "sessions",
            column: "afk_ms",
        })
        .await
        .expect("query failed")
    );
    assert!(
        !db.query(&TableExistsQuery {
            table: "schema_version",
        })
        .await
        .expect("query failed")
    );

    // The upgraded table accepts a current-shape session.
    let server = common::sample_server();
    let player = common::sample_player("Patched");
    db.execute_transaction(RegisterServerTransaction::new(server.clone()))
        .expect("submit failed")
        .wait()
        .await
        .expect("transaction failed");
    db.execute_transaction(RegisterPlayerTransaction::new(player.clone()))
        .expect("submit failed")
        .wait()
        .await
        .expect("transaction failed");
    db.execute_transaction(StoreSessionTransaction::new(common::sample_session(
        &server, &player, 1_000,
    )))
    .expect("submit failed")
    .wait()
    .await
    .expect("transaction failed");

    db.close().await;
}

#[tokio::test]
async fn init_is_idempotent_on_a_current_schema() {
    let (_dir, db) = common::temp_database();
    db.init().await.expect("first init failed");
    db.init().await.expect("second init failed");

    assert!(
        db.query(&ColumnExistsQuery {
            table: "server_metrics",
            column: "free_disk_bytes",
        })
        .await
        .expect("query failed")
    );
    db.close().await;
}

#[tokio::test]
async fn index_creation_is_repeatable() {
    let (_dir, db) = common::temp_database();
    db.init().await.expect("init failed");

    for _ in 0..2 {
        db.execute_transaction(CreateIndexesTransaction)
            .expect("submit failed")
            .wait()
            .await
            .expect("index creation failed");
    }
    db.close().await;
}
