use async_trait::async_trait;

use crate::db::connection::{ConnectionLease, SqlValue};
use crate::error::DbError;

/// A named, single-shot unit of mutating work.
///
/// Transactions are queued and executed one at a time, in submission order,
/// by the handle's write worker, wrapped in an explicit begin/commit
/// boundary. The engine does not make them idempotent: a transaction that
/// was queued but never started may be re-run verbatim after a forced
/// shutdown drain, so bodies must tolerate at-least-once execution.
#[async_trait]
pub trait Transaction: Send + 'static {
    fn name(&self) -> &str;

    async fn perform(&mut self, lease: &mut ConnectionLease) -> Result<(), DbError>;
}

/// Transaction built from a list of plain statements, executed in order.
pub struct SqlTransaction {
    name: String,
    statements: Vec<(String, Vec<SqlValue>)>,
}

impl SqlTransaction {
    pub fn new(name: impl Into<String>) -> Self {
        SqlTransaction {
            name: name.into(),
            statements: Vec::new(),
        }
    }

    pub fn statement(mut self, sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        self.statements.push((sql.into(), params));
        self
    }
}

#[async_trait]
impl Transaction for SqlTransaction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn perform(&mut self, lease: &mut ConnectionLease) -> Result<(), DbError> {
        for (sql, params) in &self.statements {
            lease.execute(sql, params).await?;
        }
        Ok(())
    }
}
