//! Transactional persistence engine.
//!
//! One [`Database`] handle owns a connection provider, a lock-free lifecycle
//! state and a single-worker transaction queue. Writes are serialized in
//! submission order through the queue; reads run concurrently on their own
//! pooled connections and never wait behind the writer.

pub mod connection;
pub mod executor;
pub mod index;
pub mod models;
pub mod patch;
pub mod query;
pub mod schema;
pub mod state;
pub mod transaction;
pub mod transfer;

mod patch_impl;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use connection::{Backend, ConnectionLease, SqlRow, SqlValue};
pub use executor::TransactionHandle;
pub use patch::Patch;
pub use query::{FilteredCountQuery, Query, RowCountQuery, TableDumpQuery};
pub use state::{AccessGuard, AccessKind, DatabaseState};
pub use transaction::{SqlTransaction, Transaction};

use crate::config::StorageConfig;
use crate::db::connection::ConnectionProvider;
use crate::db::executor::{QueuedTransaction, TransactionExecutor, lock};
use crate::db::state::{StateAccessGuard, StateCell};
use crate::error::DbError;

/// Drain waits longer than this are a configuration mistake.
const MAX_DRAIN_WAIT: Duration = Duration::from_secs(5 * 60);

/// State shared between the handle, the transaction worker and the query
/// path.
pub(crate) struct DbCore {
    pub(crate) state: StateCell,
    provider: RwLock<Option<ConnectionProvider>>,
}

impl DbCore {
    pub(crate) async fn acquire(&self) -> Result<ConnectionLease, DbError> {
        let guard = self.provider.read().await;
        match guard.as_ref() {
            Some(provider) => provider.acquire().await,
            None => Err(DbError::Closed),
        }
    }
}

/// Handle to one telemetry database.
///
/// Cheap to clone; every clone shares the same lifecycle, provider and write
/// queue. Starts out `Closed`; call [`Database::init`] before use.
#[derive(Clone)]
pub struct Database {
    shared: Arc<Shared>,
}

struct Shared {
    config: StorageConfig,
    core: Arc<DbCore>,
    guard: Arc<dyn AccessGuard>,
    /// Serializes init() against close(); never held while executing
    /// transactions.
    lifecycle: tokio::sync::Mutex<()>,
    /// Held only for the moment of a submit or a worker swap.
    executor: std::sync::Mutex<Option<TransactionExecutor>>,
    /// Un-started transactions reclaimed by close(), waiting for the next
    /// init() to re-queue them.
    handover: std::sync::Mutex<Vec<QueuedTransaction>>,
    index_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Database {
    pub fn open(config: StorageConfig) -> Self {
        Self::with_guard(config, Arc::new(StateAccessGuard))
    }

    /// Like [`Database::open`] with a caller-supplied access policy.
    pub fn with_guard(config: StorageConfig, guard: Arc<dyn AccessGuard>) -> Self {
        Database {
            shared: Arc::new(Shared {
                config,
                core: Arc::new(DbCore {
                    state: StateCell::new(),
                    provider: RwLock::new(None),
                }),
                guard,
                lifecycle: tokio::sync::Mutex::new(()),
                executor: std::sync::Mutex::new(None),
                handover: std::sync::Mutex::new(Vec::new()),
                index_task: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> DatabaseState {
        self.shared.core.state.get()
    }

    pub fn backend(&self) -> Backend {
        self.shared.config.backend
    }

    /// Brings the handle to `Open`: connects the backend, creates missing
    /// tables, applies schema patches in declared order and starts the
    /// transaction worker.
    ///
    /// Safe to call on an already-open handle; the previous worker is drained
    /// first and its un-started transactions are queued ahead of new ones.
    /// On failure the handle ends up `Closed` and those transactions stay
    /// parked for the next attempt.
    pub async fn init(&self) -> Result<(), DbError> {
        let _lifecycle = self.shared.lifecycle.lock().await;

        let mut carryover = Vec::new();
        if let Some(previous) = lock(&self.shared.executor).take() {
            self.shared.core.state.set(DatabaseState::Closing);
            carryover = previous.shutdown(self.drain_wait()).await;
        }
        {
            let mut parked = lock(&self.shared.handover);
            carryover.extend(parked.drain(..));
        }

        self.shared.core.state.set(DatabaseState::Patching);

        if let Some(stale) = self.shared.core.provider.write().await.take() {
            stale.close().await;
        }

        let provider = match self.connect().await {
            Ok(provider) => provider,
            Err(e) => {
                self.park_and_close(carryover).await;
                return Err(e);
            }
        };
        *self.shared.core.provider.write().await = Some(provider);

        if let Err(e) = self.setup_schema().await {
            self.park_and_close(carryover).await;
            return Err(e);
        }

        if !self
            .shared
            .core
            .state
            .transition(DatabaseState::Patching, DatabaseState::Open)
        {
            self.park_and_close(carryover).await;
            return Err(DbError::Init(
                "database was closed during initialization".to_string(),
            ));
        }

        info!(backend = ?self.backend(), "database initialized");
        *lock(&self.shared.executor) = Some(TransactionExecutor::start(
            Arc::clone(&self.shared.core),
            carryover,
        ));

        self.schedule_index_creation();
        Ok(())
    }

    /// Stops accepting work, drains the queue for up to the configured wait
    /// and releases the backend. Idempotent. Un-started transactions are kept
    /// and re-queued by the next `init()` on this handle.
    pub async fn close(&self) {
        let _lifecycle = self.shared.lifecycle.lock().await;
        if self.state() == DatabaseState::Closed && lock(&self.shared.executor).is_none() {
            return;
        }
        self.shared.core.state.set(DatabaseState::Closing);

        if let Some(task) = lock(&self.shared.index_task).take() {
            task.abort();
        }

        if let Some(executor) = lock(&self.shared.executor).take() {
            let unfinished = executor.shutdown(self.drain_wait()).await;
            if !unfinished.is_empty() {
                lock(&self.shared.handover).extend(unfinished);
            }
        }

        if let Some(provider) = self.shared.core.provider.write().await.take() {
            provider.close().await;
        }
        self.shared.core.state.set(DatabaseState::Closed);
        info!("database closed");
    }

    /// Queues a transaction for the single worker. Rejection is synchronous;
    /// the outcome of an accepted transaction is only observable through the
    /// returned handle.
    pub fn execute_transaction<T: Transaction>(
        &self,
        transaction: T,
    ) -> Result<TransactionHandle, DbError> {
        self.shared
            .guard
            .check(self.state(), AccessKind::Write)?;

        let (done, rx) = tokio::sync::oneshot::channel();
        let item = QueuedTransaction {
            name: transaction.name().to_string(),
            transaction: Box::new(transaction),
            done,
        };
        match lock(&self.shared.executor).as_ref() {
            Some(executor) => {
                executor.submit(item)?;
                Ok(TransactionHandle::new(rx))
            }
            None => Err(DbError::Closed),
        }
    }

    /// Runs a read on its own pooled connection, concurrently with other
    /// reads and with whatever the write worker is doing.
    pub async fn query<Q: Query>(&self, query: &Q) -> Result<Q::Output, DbError> {
        self.shared.guard.check(self.state(), AccessKind::Read)?;
        let mut lease = self.shared.core.acquire().await?;
        query.run(&mut lease).await
    }

    async fn connect(&self) -> Result<ConnectionProvider, DbError> {
        match self.shared.config.backend {
            Backend::Sqlite => ConnectionProvider::embedded(&self.shared.config.sqlite.path).await,
            Backend::MySql => ConnectionProvider::networked(self.shared.config.mysql.clone()).await,
        }
    }

    async fn setup_schema(&self) -> Result<(), DbError> {
        let mut lease = self.shared.core.acquire().await?;
        for statement in schema::init_statements(self.backend()) {
            lease.execute(statement, &[]).await?;
        }
        patch::apply_all(&mut lease, &patch_impl::patches()).await
    }

    /// Parks un-started transactions for a later init() and tears down the
    /// half-initialized backend.
    async fn park_and_close(&self, carryover: Vec<QueuedTransaction>) {
        if !carryover.is_empty() {
            lock(&self.shared.handover).extend(carryover);
        }
        if let Some(provider) = self.shared.core.provider.write().await.take() {
            provider.close().await;
        }
        self.shared.core.state.set(DatabaseState::Closed);
    }

    fn drain_wait(&self) -> Duration {
        let configured = Duration::from_millis(self.shared.config.transaction_drain_wait_ms);
        if configured > MAX_DRAIN_WAIT {
            warn!(
                "transaction drain wait was set to over 5 minutes, using 5 minutes instead"
            );
            MAX_DRAIN_WAIT
        } else {
            configured
        }
    }

    /// Index builds can be slow on large tables, so they run as a regular
    /// queued transaction a minute after init instead of holding up startup.
    fn schedule_index_creation(&self) {
        let handle = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(index::INDEX_CREATION_DELAY).await;
            match handle.execute_transaction(index::CreateIndexesTransaction) {
                Ok(pending) => {
                    if let Err(e) = pending.wait().await {
                        warn!(error = %e, "index creation failed");
                    }
                }
                Err(e) => {
                    debug!(error = %e, "index creation was not scheduled");
                }
            }
        });
        if let Some(previous) = lock(&self.shared.index_task).replace(task) {
            previous.abort();
        }
    }
}
