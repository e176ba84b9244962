//! Backend-to-backend data transfer.
//!
//! Moves every row from one open database to another through the neutral
//! [`SqlRow`] representation, so SQLite-to-MySQL and the reverse both work.
//! The destination's contents are replaced table by table.

use async_trait::async_trait;
use tracing::info;

use crate::db::Database;
use crate::db::connection::{ConnectionLease, SqlRow};
use crate::db::query::TableDumpQuery;
use crate::db::schema;
use crate::db::transaction::Transaction;
use crate::error::DbError;

/// Copies all rows of every table from `source` into `destination`.
///
/// Both handles must be open. Tables are copied parent-first
/// ([`schema::COPY_ORDER`]) and each table's restore runs through the
/// destination's write queue as a single transaction, so a failure leaves at
/// most one table partially replaced rather than torn rows.
pub async fn copy_all_entities(source: &Database, destination: &Database) -> Result<(), DbError> {
    for table in schema::COPY_ORDER.iter().copied() {
        let rows = source.query(&TableDumpQuery::new(table)).await?;
        info!(table, rows = rows.len(), "transferring table");
        destination
            .execute_transaction(TableRestoreTransaction::new(table, rows))?
            .wait()
            .await?;
    }
    Ok(())
}

/// Replaces one table's contents with the given rows.
struct TableRestoreTransaction {
    table: &'static str,
    rows: Vec<SqlRow>,
}

impl TableRestoreTransaction {
    fn new(table: &'static str, rows: Vec<SqlRow>) -> Self {
        TableRestoreTransaction { table, rows }
    }
}

#[async_trait]
impl Transaction for TableRestoreTransaction {
    fn name(&self) -> &str {
        "TableRestoreTransaction"
    }

    async fn perform(&mut self, lease: &mut ConnectionLease) -> Result<(), DbError> {
        let columns = schema::table_columns(self.table);
        let placeholders = vec!["?"; columns.len()].join(", ");
        let insert = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            self.table,
            columns.join(", ")
        );

        lease
            .execute(&format!("DELETE FROM {}", self.table), &[])
            .await?;
        for row in &self.rows {
            lease.execute(&insert, row.values()).await?;
        }
        Ok(())
    }
}
