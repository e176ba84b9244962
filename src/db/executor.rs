//! Single-worker transaction queue.
//!
//! Each database handle owns at most one live executor. Submissions are
//! pushed onto a bounded queue and a dedicated worker task pops them one at
//! a time, so all mutating work is serialized in submission order. The
//! fatal/recoverable branch is taken explicitly in the loop body rather than
//! through any uncaught-failure hook.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::db::DbCore;
use crate::db::state::DatabaseState;
use crate::db::transaction::Transaction;
use crate::error::DbError;

const QUEUE_CAPACITY: usize = 4096;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A transaction waiting in the queue, with the channel used to resolve its
/// caller-visible handle. Survives executor replacement verbatim: items that
/// never started are carried over to the next worker.
pub(crate) struct QueuedTransaction {
    pub(crate) name: String,
    pub(crate) transaction: Box<dyn Transaction>,
    pub(crate) done: oneshot::Sender<Result<(), DbError>>,
}

/// Future-like handle for one submitted transaction.
///
/// Write failures never propagate synchronously; awaiting this handle is the
/// only way for the submitter to learn the outcome. Every failure is also
/// logged by the worker, so an un-awaited handle cannot hide data loss.
pub struct TransactionHandle {
    rx: oneshot::Receiver<Result<(), DbError>>,
}

impl TransactionHandle {
    pub(crate) fn new(rx: oneshot::Receiver<Result<(), DbError>>) -> Self {
        TransactionHandle { rx }
    }

    /// Resolves once the transaction has been executed (or rejected).
    pub async fn wait(self) -> Result<(), DbError> {
        self.rx.await.unwrap_or(Err(DbError::WorkerLost))
    }
}

struct QueueInner {
    items: Mutex<VecDeque<QueuedTransaction>>,
    notify: Notify,
    accepting: AtomicBool,
    /// Worker exits once the queue is empty.
    drain_and_exit: AtomicBool,
    /// Worker exits after the item it is currently running.
    hard_stop: AtomicBool,
}

pub(crate) struct TransactionExecutor {
    queue: Arc<QueueInner>,
    worker: JoinHandle<()>,
}

impl TransactionExecutor {
    /// Spawns the worker. `carryover` items from a drained predecessor are
    /// queued ahead of anything submitted later.
    pub(crate) fn start(core: Arc<DbCore>, carryover: Vec<QueuedTransaction>) -> Self {
        let queue = Arc::new(QueueInner {
            items: Mutex::new(carryover.into_iter().collect()),
            notify: Notify::new(),
            accepting: AtomicBool::new(true),
            drain_and_exit: AtomicBool::new(false),
            hard_stop: AtomicBool::new(false),
        });
        let worker = tokio::spawn(worker_loop(core, Arc::clone(&queue)));
        TransactionExecutor { queue, worker }
    }

    /// Never blocks: either the item is queued or the caller gets a
    /// synchronous rejection.
    pub(crate) fn submit(&self, item: QueuedTransaction) -> Result<(), DbError> {
        if !self.queue.accepting.load(Ordering::Acquire) {
            return Err(DbError::Closed);
        }
        {
            let mut items = lock(&self.queue.items);
            if items.len() >= QUEUE_CAPACITY {
                return Err(DbError::QueueFull);
            }
            items.push_back(item);
        }
        self.queue.notify.notify_one();
        Ok(())
    }

    /// Orderly shutdown: stop accepting, wait up to `wait` for the queue to
    /// drain, then reclaim whatever never started. The item the worker is
    /// currently executing is left to finish on its own and is not returned.
    pub(crate) async fn shutdown(self, wait: Duration) -> Vec<QueuedTransaction> {
        self.queue.accepting.store(false, Ordering::Release);
        self.queue.drain_and_exit.store(true, Ordering::Release);
        self.queue.notify.notify_one();

        let mut worker = self.worker;
        if tokio::time::timeout(wait, &mut worker).await.is_err() {
            self.queue.hard_stop.store(true, Ordering::Release);
            self.queue.notify.notify_one();
            let remaining: Vec<QueuedTransaction> = lock(&self.queue.items).drain(..).collect();
            if !remaining.is_empty() {
                warn!(
                    count = remaining.len(),
                    "unfinished database transactions were not executed, \
                     they will be re-queued on the next init"
                );
            }
            return remaining;
        }
        Vec::new()
    }
}

async fn worker_loop(core: Arc<DbCore>, queue: Arc<QueueInner>) {
    loop {
        let item = lock(&queue.items).pop_front();
        let Some(item) = item else {
            if queue.drain_and_exit.load(Ordering::Acquire) {
                break;
            }
            queue.notify.notified().await;
            continue;
        };
        run_one(&core, item).await;
        if queue.hard_stop.load(Ordering::Acquire) {
            break;
        }
    }
    debug!("transaction worker stopped");
}

async fn run_one(core: &DbCore, item: QueuedTransaction) {
    let QueuedTransaction {
        name,
        mut transaction,
        done,
    } = item;

    // A fatal error earlier in the queue closed the handle: later items are
    // discarded, not re-queued, and their submitters are told why.
    if core.state.get() == DatabaseState::Closed {
        debug!(transaction = %name, "discarding queued transaction, database is closed");
        let _ = done.send(Err(DbError::Closed));
        return;
    }

    debug!(transaction = %name, "executing transaction");
    let result = execute_one(core, transaction.as_mut()).await;
    match &result {
        Ok(()) => {}
        Err(e) if e.is_fatal() => {
            error!(
                transaction = %name,
                error = %e,
                "fatal error during transaction, closing database"
            );
            core.state.set(DatabaseState::Closed);
        }
        Err(e) => {
            error!(transaction = %name, error = %e, "transaction failed");
        }
    }
    let _ = done.send(result);
}

async fn execute_one(core: &DbCore, transaction: &mut dyn Transaction) -> Result<(), DbError> {
    let mut lease = core.acquire().await?;
    lease.begin().await?;
    match transaction.perform(&mut lease).await {
        Ok(()) => lease.commit().await,
        Err(e) => {
            if let Err(rollback_err) = lease.rollback().await {
                warn!(error = %rollback_err, "rollback failed after transaction error");
            }
            Err(e)
        }
    }
}
