//! Connection provisioning for the two backend shapes.
//!
//! Embedded (SQLite, file-backed) and networked (MySQL, pooled) providers
//! hand out [`ConnectionLease`]s. A lease owns its pooled connection, so it
//! is returned on every exit path, including early returns and panics.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Connection as _, MySql, MySqlPool, Row as _, Sqlite, SqlitePool, TypeInfo, ValueRef};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::config::MySqlConfig;
use crate::db::query::Query;
use crate::error::DbError;

/// Backend shape of a database handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sqlite,
    MySql,
}

/// Reads never queue behind the single write worker, so the embedded pool
/// keeps a few reader connections alongside the writer's.
const SQLITE_POOL_CAPACITY: u32 = 4;
const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MYSQL_POOL_CAPACITY: u32 = 8;
const MYSQL_MAX_LIFETIME: Duration = Duration::from_secs(25 * 60);
const VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

/// A lease held longer than this is considered leaked and logged.
const LEASE_LEAK_THRESHOLD: Duration = Duration::from_secs(10 * 60);

/// Backend-neutral SQL parameter and result value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Bool(bool),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Integer(i64::from(value))
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        SqlValue::Blob(value)
    }
}

impl From<Uuid> for SqlValue {
    fn from(value: Uuid) -> Self {
        SqlValue::Text(value.hyphenated().to_string())
    }
}

impl From<Option<String>> for SqlValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(SqlValue::Null, SqlValue::Text)
    }
}

impl From<Option<i64>> for SqlValue {
    fn from(value: Option<i64>) -> Self {
        value.map_or(SqlValue::Null, SqlValue::Integer)
    }
}

/// One decoded result row.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlRow(Vec<SqlValue>);

impl SqlRow {
    pub fn values(&self) -> &[SqlValue] {
        &self.0
    }

    pub fn into_values(self) -> Vec<SqlValue> {
        self.0
    }

    pub fn integer_at(&self, column: usize) -> Result<i64, DbError> {
        match self.0.get(column) {
            Some(SqlValue::Integer(v)) => Ok(*v),
            Some(SqlValue::Bool(v)) => Ok(i64::from(*v)),
            _ => Err(DbError::UnexpectedValue {
                column,
                expected: "integer",
            }),
        }
    }

    pub fn opt_integer_at(&self, column: usize) -> Result<Option<i64>, DbError> {
        match self.0.get(column) {
            Some(SqlValue::Null) => Ok(None),
            _ => self.integer_at(column).map(Some),
        }
    }

    pub fn real_at(&self, column: usize) -> Result<f64, DbError> {
        match self.0.get(column) {
            Some(SqlValue::Real(v)) => Ok(*v),
            #[allow(clippy::cast_precision_loss)]
            Some(SqlValue::Integer(v)) => Ok(*v as f64),
            _ => Err(DbError::UnexpectedValue {
                column,
                expected: "real",
            }),
        }
    }

    pub fn text_at(&self, column: usize) -> Result<&str, DbError> {
        match self.0.get(column) {
            Some(SqlValue::Text(v)) => Ok(v),
            _ => Err(DbError::UnexpectedValue {
                column,
                expected: "text",
            }),
        }
    }

    pub fn opt_text_at(&self, column: usize) -> Result<Option<&str>, DbError> {
        match self.0.get(column) {
            Some(SqlValue::Null) => Ok(None),
            _ => self.text_at(column).map(Some),
        }
    }

    pub fn uuid_at(&self, column: usize) -> Result<Uuid, DbError> {
        Uuid::parse_str(self.text_at(column)?).map_err(|_| DbError::UnexpectedValue {
            column,
            expected: "uuid",
        })
    }
}

impl From<Vec<SqlValue>> for SqlRow {
    fn from(values: Vec<SqlValue>) -> Self {
        SqlRow(values)
    }
}

macro_rules! bind_params {
    ($query:expr, $params:expr) => {{
        let mut q = $query;
        for value in $params {
            q = match value {
                SqlValue::Null => q.bind(None::<i64>),
                SqlValue::Integer(v) => q.bind(*v),
                SqlValue::Real(v) => q.bind(*v),
                SqlValue::Bool(v) => q.bind(*v),
                SqlValue::Text(v) => q.bind(v.clone()),
                SqlValue::Blob(v) => q.bind(v.clone()),
            };
        }
        q
    }};
}

enum DbConnection {
    Sqlite(PoolConnection<Sqlite>),
    MySql(PoolConnection<MySql>),
}

/// A borrowed connection plus the obligation to return it.
///
/// The pooled connection travels back to its pool on drop; the lease only
/// adds leak detection and the backend-neutral statement helpers that
/// [`Transaction`](crate::db::Transaction) and [`Query`] bodies run against.
pub struct ConnectionLease {
    conn: DbConnection,
    backend: Backend,
    acquired_at: Instant,
}

impl ConnectionLease {
    fn new(conn: DbConnection, backend: Backend) -> Self {
        ConnectionLease {
            conn,
            backend,
            acquired_at: Instant::now(),
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Executes a statement, returning the number of affected rows.
    pub async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        match &mut self.conn {
            DbConnection::Sqlite(c) => {
                let query = bind_params!(sqlx::query(sql), params);
                Ok(query.execute(&mut **c).await?.rows_affected())
            }
            DbConnection::MySql(c) => {
                let query = bind_params!(sqlx::query(sql), params);
                Ok(query.execute(&mut **c).await?.rows_affected())
            }
        }
    }

    /// Fetches all rows, decoded into backend-neutral values.
    pub async fn fetch_rows(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Vec<SqlRow>, DbError> {
        match &mut self.conn {
            DbConnection::Sqlite(c) => {
                let query = bind_params!(sqlx::query(sql), params);
                let rows = query.fetch_all(&mut **c).await?;
                rows.iter().map(decode_sqlite_row).collect()
            }
            DbConnection::MySql(c) => {
                let query = bind_params!(sqlx::query(sql), params);
                let rows = query.fetch_all(&mut **c).await?;
                rows.iter().map(decode_mysql_row).collect()
            }
        }
    }

    /// Fetches a single-column, single-row result.
    pub async fn fetch_scalar<T>(&mut self, sql: &str, params: &[SqlValue]) -> Result<T, DbError>
    where
        T: Send + Unpin,
        T: for<'r> sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
        T: for<'r> sqlx::Decode<'r, MySql> + sqlx::Type<MySql>,
    {
        match &mut self.conn {
            DbConnection::Sqlite(c) => {
                let query = bind_params!(sqlx::query_scalar::<Sqlite, T>(sql), params);
                Ok(query.fetch_one(&mut **c).await?)
            }
            DbConnection::MySql(c) => {
                let query = bind_params!(sqlx::query_scalar::<MySql, T>(sql), params);
                Ok(query.fetch_one(&mut **c).await?)
            }
        }
    }

    /// Like [`Self::fetch_scalar`] but tolerates an empty result set.
    pub async fn fetch_optional_scalar<T>(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<T>, DbError>
    where
        T: Send + Unpin,
        T: for<'r> sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
        T: for<'r> sqlx::Decode<'r, MySql> + sqlx::Type<MySql>,
    {
        match &mut self.conn {
            DbConnection::Sqlite(c) => {
                let query = bind_params!(sqlx::query_scalar::<Sqlite, T>(sql), params);
                Ok(query.fetch_optional(&mut **c).await?)
            }
            DbConnection::MySql(c) => {
                let query = bind_params!(sqlx::query_scalar::<MySql, T>(sql), params);
                Ok(query.fetch_optional(&mut **c).await?)
            }
        }
    }

    /// Runs a read-only query on this lease. Inside a transaction body this
    /// observes the transaction's own uncommitted writes.
    pub async fn query<Q: Query>(&mut self, query: &Q) -> Result<Q::Output, DbError> {
        query.run(self).await
    }

    pub(crate) async fn begin(&mut self) -> Result<(), DbError> {
        let sql = match self.backend {
            Backend::Sqlite => "BEGIN",
            Backend::MySql => "START TRANSACTION",
        };
        self.execute(sql, &[]).await.map(|_| ())
    }

    pub(crate) async fn commit(&mut self) -> Result<(), DbError> {
        self.execute("COMMIT", &[]).await.map(|_| ())
    }

    pub(crate) async fn rollback(&mut self) -> Result<(), DbError> {
        self.execute("ROLLBACK", &[]).await.map(|_| ())
    }

    pub async fn has_table(&mut self, table: &str) -> Result<bool, DbError> {
        let count: i64 = match self.backend {
            Backend::Sqlite => {
                self.fetch_scalar(
                    "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
                    &[SqlValue::from(table)],
                )
                .await?
            }
            Backend::MySql => {
                self.fetch_scalar(
                    "SELECT count(*) FROM information_schema.tables \
                     WHERE table_schema = DATABASE() AND table_name = ?",
                    &[SqlValue::from(table)],
                )
                .await?
            }
        };
        Ok(count > 0)
    }

    pub async fn has_column(&mut self, table: &str, column: &str) -> Result<bool, DbError> {
        let count: i64 = match self.backend {
            Backend::Sqlite => {
                self.fetch_scalar(
                    "SELECT count(*) FROM pragma_table_info(?) WHERE name = ?",
                    &[SqlValue::from(table), SqlValue::from(column)],
                )
                .await?
            }
            Backend::MySql => {
                self.fetch_scalar(
                    "SELECT count(*) FROM information_schema.columns \
                     WHERE table_schema = DATABASE() AND table_name = ? AND column_name = ?",
                    &[SqlValue::from(table), SqlValue::from(column)],
                )
                .await?
            }
        };
        Ok(count > 0)
    }

    /// MySQL only; SQLite callers use `CREATE INDEX IF NOT EXISTS` instead.
    pub async fn index_exists(&mut self, table: &str, index: &str) -> Result<bool, DbError> {
        let count: i64 = self
            .fetch_scalar(
                "SELECT count(*) FROM information_schema.statistics \
                 WHERE table_schema = DATABASE() AND table_name = ? AND index_name = ?",
                &[SqlValue::from(table), SqlValue::from(index)],
            )
            .await?;
        Ok(count > 0)
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        let held = self.acquired_at.elapsed();
        if held > LEASE_LEAK_THRESHOLD {
            warn!(
                held_secs = held.as_secs(),
                "connection lease was held far longer than expected"
            );
        }
    }
}

fn decode_sqlite_row(row: &SqliteRow) -> Result<SqlRow, DbError> {
    let mut values = Vec::with_capacity(row.columns().len());
    for index in 0..row.columns().len() {
        let raw = row.try_get_raw(index)?;
        let is_null = raw.is_null();
        let type_name = raw.type_info().name().to_string();
        drop(raw);

        let value = if is_null {
            SqlValue::Null
        } else {
            match type_name.as_str() {
                "INTEGER" => SqlValue::Integer(row.try_get(index)?),
                "REAL" => SqlValue::Real(row.try_get(index)?),
                "BLOB" => SqlValue::Blob(row.try_get(index)?),
                "BOOLEAN" => SqlValue::Bool(row.try_get(index)?),
                _ => SqlValue::Text(row.try_get(index)?),
            }
        };
        values.push(value);
    }
    Ok(SqlRow(values))
}

fn decode_mysql_row(row: &MySqlRow) -> Result<SqlRow, DbError> {
    let mut values = Vec::with_capacity(row.columns().len());
    for index in 0..row.columns().len() {
        let raw = row.try_get_raw(index)?;
        let is_null = raw.is_null();
        let type_name = raw.type_info().name().to_string();
        drop(raw);

        let value = if is_null {
            SqlValue::Null
        } else {
            match type_name.as_str() {
                "BOOLEAN" => SqlValue::Bool(row.try_get(index)?),
                "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
                    SqlValue::Integer(row.try_get(index)?)
                }
                "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED"
                | "INT UNSIGNED" | "BIGINT UNSIGNED" => {
                    let unsigned: u64 = row.try_get(index)?;
                    SqlValue::Integer(i64::try_from(unsigned).map_err(|_| {
                        DbError::UnexpectedValue {
                            column: index,
                            expected: "integer within i64 range",
                        }
                    })?)
                }
                "FLOAT" => {
                    let narrow: f32 = row.try_get(index)?;
                    SqlValue::Real(f64::from(narrow))
                }
                "DOUBLE" => SqlValue::Real(row.try_get(index)?),
                name if name.contains("BLOB") || name.contains("BINARY") => {
                    SqlValue::Blob(row.try_get(index)?)
                }
                _ => SqlValue::Text(row.try_get(index)?),
            }
        };
        values.push(value);
    }
    Ok(SqlRow(values))
}

/// Supplies and reclaims raw connections for one database handle.
pub(crate) enum ConnectionProvider {
    Embedded {
        pool: SqlitePool,
    },
    Networked {
        pool: RwLock<MySqlPool>,
        settings: MySqlConfig,
    },
}

impl ConnectionProvider {
    pub(crate) async fn embedded(path: &Path) -> Result<Self, DbError> {
        let connect_opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(SQLITE_BUSY_TIMEOUT)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(SQLITE_POOL_CAPACITY)
            .connect_with(connect_opts)
            .await
            .map_err(|e| DbError::Init(format!("failed to open database file: {e}")))?;

        Ok(ConnectionProvider::Embedded { pool })
    }

    pub(crate) async fn networked(settings: MySqlConfig) -> Result<Self, DbError> {
        let pool = build_mysql_pool(&settings).await?;
        Ok(ConnectionProvider::Networked {
            pool: RwLock::new(pool),
            settings,
        })
    }

    pub(crate) async fn acquire(&self) -> Result<ConnectionLease, DbError> {
        match self {
            ConnectionProvider::Embedded { pool } => {
                let conn = pool.acquire().await?;
                Ok(ConnectionLease::new(
                    DbConnection::Sqlite(conn),
                    Backend::Sqlite,
                ))
            }
            ConnectionProvider::Networked { pool, settings } => {
                let current = pool.read().await.clone();
                let mut conn = current.acquire().await?;

                let alive = matches!(
                    tokio::time::timeout(VALIDATION_TIMEOUT, conn.ping()).await,
                    Ok(Ok(()))
                );
                if alive {
                    return Ok(ConnectionLease::new(
                        DbConnection::MySql(conn),
                        Backend::MySql,
                    ));
                }

                // One bad connection poisons trust in the whole pool: close
                // it, rebuild the pool from scratch and retry the borrow once.
                warn!(
                    pool = %settings.pool_identity,
                    "borrowed connection failed validation, rebuilding connection pool"
                );
                let _ = conn.detach().close().await;

                let fresh = build_mysql_pool(settings).await.map_err(|e| {
                    DbError::Unrecoverable(format!(
                        "failed to restart connection pool after an invalid connection: {e}"
                    ))
                })?;
                {
                    let mut guard = pool.write().await;
                    let stale = std::mem::replace(&mut *guard, fresh.clone());
                    stale.close().await;
                }

                let conn = fresh.acquire().await?;
                Ok(ConnectionLease::new(
                    DbConnection::MySql(conn),
                    Backend::MySql,
                ))
            }
        }
    }

    pub(crate) async fn close(&self) {
        match self {
            ConnectionProvider::Embedded { pool } => pool.close().await,
            ConnectionProvider::Networked { pool, .. } => {
                let current = pool.read().await.clone();
                current.close().await;
            }
        }
    }
}

async fn build_mysql_pool(settings: &MySqlConfig) -> Result<MySqlPool, DbError> {
    let connect_opts = MySqlConnectOptions::new()
        .host(&settings.host)
        .port(settings.port)
        .username(&settings.username)
        .password(&settings.password)
        .database(&settings.database);

    let identity = settings.pool_identity.clone();
    MySqlPoolOptions::new()
        .max_connections(MYSQL_POOL_CAPACITY)
        .max_lifetime(MYSQL_MAX_LIFETIME)
        .test_before_acquire(false)
        .after_connect(|conn, _meta| {
            // Telemetry timestamps are epoch-based; session timezone is
            // pinned so DATETIME comparisons behave the same on every server.
            Box::pin(async move {
                sqlx::query("SET time_zone = '+00:00'")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect_with(connect_opts)
        .await
        .map_err(|e| DbError::Init(format!("failed to set up connection pool {identity}: {e}")))
}
