//! Deferred index creation.
//!
//! Indexes are not part of table creation; they are built by a transaction
//! the handle schedules a minute after a successful init, so startup is not
//! held up by index builds on large tables.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::db::connection::{Backend, ConnectionLease};
use crate::db::schema;
use crate::db::transaction::Transaction;
use crate::error::DbError;

pub(crate) const INDEX_CREATION_DELAY: Duration = Duration::from_secs(60);

const INDEXES: &[(&str, &str, &[&str])] = &[
    (
        schema::SESSIONS,
        "index_session_identity",
        &["player_uuid", "server_uuid"],
    ),
    (schema::SESSIONS, "index_session_start", &["session_start"]),
    (
        schema::SERVER_METRICS,
        "index_metric_date",
        &["server_uuid", "date"],
    ),
    (schema::PLAYERS, "index_player_uuid", &["uuid"]),
];

/// Creates every missing index. Safe to run repeatedly.
pub struct CreateIndexesTransaction;

#[async_trait]
impl Transaction for CreateIndexesTransaction {
    fn name(&self) -> &str {
        "CreateIndexesTransaction"
    }

    async fn perform(&mut self, lease: &mut ConnectionLease) -> Result<(), DbError> {
        for &(table, index, columns) in INDEXES {
            let exists = match lease.backend() {
                // CREATE INDEX IF NOT EXISTS below makes the check redundant
                // on SQLite.
                Backend::Sqlite => false,
                Backend::MySql => lease.index_exists(table, index).await?,
            };
            if exists {
                continue;
            }
            debug!(table, index, "creating index");
            let if_not_exists = match lease.backend() {
                Backend::Sqlite => "IF NOT EXISTS ",
                Backend::MySql => "",
            };
            let sql = format!(
                "CREATE INDEX {if_not_exists}{index} ON {table} ({})",
                columns.join(", ")
            );
            lease.execute(&sql, &[]).await?;
        }
        Ok(())
    }
}
