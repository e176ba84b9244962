//! Transactional persistence for game-server telemetry.
//!
//! The entry point is [`Database`]: a cloneable handle over an embedded
//! (SQLite) or networked (MySQL) backend with serialized writes, concurrent
//! reads and self-upgrading schema management.

pub mod config;
pub mod db;
pub mod error;

pub use config::{MySqlConfig, SqliteConfig, StorageConfig};
pub use db::{
    AccessGuard, AccessKind, Backend, ConnectionLease, Database, DatabaseState, FilteredCountQuery,
    Patch, Query, RowCountQuery, SqlRow, SqlTransaction, SqlValue, TableDumpQuery, Transaction,
    TransactionHandle,
};
pub use error::{DbError, Severity};
