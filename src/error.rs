use thiserror::Error as ThisError;

use crate::db::DatabaseState;

/// Classification attached to every runtime failure.
///
/// The transaction worker inspects this instead of downcasting error types:
/// a `Fatal` error closes the owning database handle, a `Recoverable` one is
/// logged and the queue moves on to the next item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    Recoverable,
}

#[derive(Debug, ThisError)]
pub enum DbError {
    #[error("failed to set up database: {0}")]
    Init(String),

    #[error("transaction tried to execute although database is closed")]
    Closed,

    #[error("operation rejected while database is {0:?}")]
    AccessDenied(DatabaseState),

    #[error("transaction queue is full")]
    QueueFull,

    #[error("transaction worker terminated before completing the transaction")]
    WorkerLost,

    #[error("patch {name} failed: {source}")]
    Patch {
        name: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("unexpected value in result column {column}: expected {expected}")]
    UnexpectedValue {
        column: usize,
        expected: &'static str,
    },

    #[error("unrecoverable database failure: {0}")]
    Unrecoverable(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database driver error: {0}")]
    Driver(#[from] sqlx::Error),
}

impl DbError {
    pub fn severity(&self) -> Severity {
        match self {
            DbError::Init(_) | DbError::Unrecoverable(_) => Severity::Fatal,
            DbError::Driver(e) => driver_severity(e),
            DbError::Patch { source, .. } => source.severity(),
            _ => Severity::Recoverable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

/// A dead connection or a closed pool cannot be recovered from inside a
/// transaction; statement-level failures (constraint violations, decode
/// errors, missing rows) only fail the one transaction that caused them.
fn driver_severity(error: &sqlx::Error) -> Severity {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => Severity::Fatal,
        _ => Severity::Recoverable,
    }
}
