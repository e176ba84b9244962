mod common;

use std::time::Duration;

use async_trait::async_trait;
use playvault::{ConnectionLease, Database, DbError, Query, SqlTransaction, SqlValue, Transaction};

struct MarkerQuery;

#[async_trait]
impl Query for MarkerQuery {
    type Output = Vec<i64>;

    async fn run(&self, lease: &mut ConnectionLease) -> Result<Vec<i64>, DbError> {
        let rows = lease
            .fetch_rows("SELECT n FROM markers ORDER BY n", &[])
            .await?;
        rows.iter().map(|row| row.integer_at(0)).collect()
    }
}

struct StallTransaction {
    delay: Duration,
}

#[async_trait]
impl Transaction for StallTransaction {
    fn name(&self) -> &str {
        "StallTransaction"
    }

    async fn perform(&mut self, _lease: &mut ConnectionLease) -> Result<(), DbError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

fn insert_marker(n: i64) -> SqlTransaction {
    SqlTransaction::new("InsertMarker").statement(
        "INSERT INTO markers (n) VALUES (?)",
        vec![SqlValue::Integer(n)],
    )
}

#[tokio::test]
async fn unstarted_transactions_survive_close_and_run_after_reinit() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let mut config = common::temp_config(&dir);
    config.transaction_drain_wait_ms = 100;
    let db = Database::open(config);
    db.init().await.expect("init failed");

    db.execute_transaction(
        SqlTransaction::new("CreateMarkers")
            .statement("CREATE TABLE IF NOT EXISTS markers (n INTEGER NOT NULL)", vec![]),
    )
    .expect("submit failed")
    .wait()
    .await
    .expect("table creation failed");

    // The stall outlasts the drain wait, so everything behind it is
    // reclaimed un-started when close() gives up.
    let _stalled = db
        .execute_transaction(StallTransaction {
            delay: Duration::from_secs(1),
        })
        .expect("submit failed");
    let parked: Vec<_> = (0..5)
        .map(|n| db.execute_transaction(insert_marker(n)).expect("submit failed"))
        .collect();

    db.close().await;

    // Handles submitted before the close are still live; they resolve once
    // the next init() re-queues and executes their transactions.
    db.init().await.expect("re-init failed");
    for handle in parked {
        tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("carried-over transaction never resolved")
            .expect("carried-over transaction failed");
    }

    let markers = db.query(&MarkerQuery).await.expect("query failed");
    assert_eq!(markers, vec![0, 1, 2, 3, 4]);
    db.close().await;
}

#[tokio::test]
async fn oversized_drain_wait_is_clamped() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let mut config = common::temp_config(&dir);
    // Over the 5 minute ceiling; close() must still track the actual drain.
    config.transaction_drain_wait_ms = 600_000;
    let db = Database::open(config);
    db.init().await.expect("init failed");

    let pending = db
        .execute_transaction(StallTransaction {
            delay: Duration::from_secs(1),
        })
        .expect("submit failed");

    let started = std::time::Instant::now();
    db.close().await;
    assert!(
        started.elapsed() < Duration::from_secs(30),
        "close did not return once the queue drained"
    );
    pending.wait().await.expect("drained transaction failed");
}

#[tokio::test]
async fn drain_completes_early_when_the_queue_is_empty() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let mut config = common::temp_config(&dir);
    config.transaction_drain_wait_ms = 60_000;
    let db = Database::open(config);
    db.init().await.expect("init failed");

    let started = std::time::Instant::now();
    db.close().await;
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "close waited for the full drain timeout on an empty queue"
    );
}
