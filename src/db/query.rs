use async_trait::async_trait;

use crate::db::connection::{ConnectionLease, SqlRow, SqlValue};
use crate::db::schema;
use crate::error::DbError;

/// A read-only function of a connection to a typed result.
///
/// Queries bypass the write queue entirely: they run on the caller's task
/// with a freshly borrowed lease and must not retain the connection after
/// returning. There is no ordering guarantee relative to transactions.
#[async_trait]
pub trait Query: Send + Sync {
    type Output: Send;

    async fn run(&self, lease: &mut ConnectionLease) -> Result<Self::Output, DbError>;
}

/// `SELECT count(*)` over one table.
pub struct RowCountQuery {
    table: &'static str,
}

impl RowCountQuery {
    pub fn new(table: &'static str) -> Self {
        RowCountQuery { table }
    }
}

#[async_trait]
impl Query for RowCountQuery {
    type Output = i64;

    async fn run(&self, lease: &mut ConnectionLease) -> Result<i64, DbError> {
        lease
            .fetch_scalar(&format!("SELECT count(*) FROM {}", self.table), &[])
            .await
    }
}

/// Dumps a full table in declared column order; the raw-row counterpart of
/// [`crate::db::transfer::copy_all_entities`]'s restore side.
pub struct TableDumpQuery {
    table: &'static str,
}

impl TableDumpQuery {
    pub fn new(table: &'static str) -> Self {
        TableDumpQuery { table }
    }
}

#[async_trait]
impl Query for TableDumpQuery {
    type Output = Vec<SqlRow>;

    async fn run(&self, lease: &mut ConnectionLease) -> Result<Vec<SqlRow>, DbError> {
        let columns = schema::table_columns(self.table);
        let sql = format!("SELECT {} FROM {}", columns.join(", "), self.table);
        lease.fetch_rows(&sql, &[]).await
    }
}

/// `SELECT count(*)` with a single equality filter.
pub struct FilteredCountQuery {
    table: &'static str,
    column: &'static str,
    value: SqlValue,
}

impl FilteredCountQuery {
    pub fn new(table: &'static str, column: &'static str, value: impl Into<SqlValue>) -> Self {
        FilteredCountQuery {
            table,
            column,
            value: value.into(),
        }
    }
}

#[async_trait]
impl Query for FilteredCountQuery {
    type Output = i64;

    async fn run(&self, lease: &mut ConnectionLease) -> Result<i64, DbError> {
        lease
            .fetch_scalar(
                &format!(
                    "SELECT count(*) FROM {} WHERE {} = ?",
                    self.table, self.column
                ),
                std::slice::from_ref(&self.value),
            )
            .await
    }
}
