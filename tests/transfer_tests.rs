mod common;

use playvault::db::models::{
    ExtensionValue, RegisterPlayerTransaction, RegisterServerTransaction, ServerMetric,
    ServerSessionsQuery, StoreExtensionValueTransaction, StoreMetricTransaction,
    StoreSessionTransaction,
};
use playvault::db::schema;
use playvault::db::transfer::copy_all_entities;
use playvault::{FilteredCountQuery, RowCountQuery};
use serde_json::json;

#[tokio::test]
async fn copies_every_table_between_two_databases() {
    let (_src_dir, source) = common::temp_database();
    let (_dst_dir, destination) = common::temp_database();
    source.init().await.expect("source init failed");
    destination.init().await.expect("destination init failed");

    let server = common::sample_server();
    let player = common::sample_player("Traveler");
    let sessions = vec![
        common::sample_session(&server, &player, 1_000),
        common::sample_session(&server, &player, 700_000),
    ];

    let mut handles = vec![
        source
            .execute_transaction(RegisterServerTransaction::new(server.clone()))
            .expect("submit failed"),
        source
            .execute_transaction(RegisterPlayerTransaction::new(player.clone()))
            .expect("submit failed"),
        source
            .execute_transaction(StoreMetricTransaction::new(ServerMetric {
                server: server.uuid,
                date: 1_700_000_000_000,
                tps: 19.8,
                players_online: 12,
                free_disk_bytes: 4_000_000_000,
            }))
            .expect("submit failed"),
        source
            .execute_transaction(StoreExtensionValueTransaction::new(ExtensionValue {
                plugin: "Economy".to_string(),
                server: server.uuid,
                name: "balance_total".to_string(),
                value: json!({ "amount": 1234.5, "currency": "emeralds" }),
            }))
            .expect("submit failed"),
    ];
    for session in &sessions {
        handles.push(
            source
                .execute_transaction(StoreSessionTransaction::new(session.clone()))
                .expect("submit failed"),
        );
    }
    for handle in handles {
        handle.wait().await.expect("seed transaction failed");
    }

    copy_all_entities(&source, &destination)
        .await
        .expect("transfer failed");

    for (table, expected) in [
        (schema::SERVERS, 1),
        (schema::PLAYERS, 1),
        (schema::SESSIONS, 2),
        (schema::SERVER_METRICS, 1),
        (schema::EXTENSION_VALUES, 1),
    ] {
        let count = destination
            .query(&RowCountQuery::new(table))
            .await
            .expect("count failed");
        assert_eq!(count, i64::from(expected), "row count mismatch in {table}");
    }

    let copied = destination
        .query(&ServerSessionsQuery::new(server.uuid))
        .await
        .expect("session query failed");
    assert_eq!(copied, sessions);

    let per_server = destination
        .query(&FilteredCountQuery::new(
            schema::SESSIONS,
            "server_uuid",
            server.uuid,
        ))
        .await
        .expect("filtered count failed");
    assert_eq!(per_server, 2);

    source.close().await;
    destination.close().await;
}

#[tokio::test]
async fn transfer_replaces_stale_destination_rows() {
    let (_src_dir, source) = common::temp_database();
    let (_dst_dir, destination) = common::temp_database();
    source.init().await.expect("source init failed");
    destination.init().await.expect("destination init failed");

    // Only the destination knows this player; a transfer must not keep it.
    destination
        .execute_transaction(RegisterPlayerTransaction::new(common::sample_player("Old")))
        .expect("submit failed")
        .wait()
        .await
        .expect("seed transaction failed");

    source
        .execute_transaction(RegisterPlayerTransaction::new(common::sample_player("New")))
        .expect("submit failed")
        .wait()
        .await
        .expect("seed transaction failed");

    copy_all_entities(&source, &destination)
        .await
        .expect("transfer failed");

    let count = destination
        .query(&RowCountQuery::new(schema::PLAYERS))
        .await
        .expect("count failed");
    assert_eq!(count, 1);

    source.close().await;
    destination.close().await;
}
