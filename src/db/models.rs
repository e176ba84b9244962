//! Telemetry row types and the event transactions/queries that move them.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::connection::{ConnectionLease, SqlRow};
use crate::db::query::Query;
use crate::db::schema;
use crate::db::transaction::Transaction;
use crate::error::DbError;

/// Current wall-clock time as epoch milliseconds, the unit every date
/// column in the schema uses.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub uuid: Uuid,
    pub name: String,
    pub web_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub uuid: Uuid,
    pub name: String,
    /// Epoch ms of first join.
    pub registered: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub player: Uuid,
    pub server: Uuid,
    pub session_start: i64,
    /// None while the session is still live.
    pub session_end: Option<i64>,
    pub mob_kills: i64,
    pub deaths: i64,
    pub afk_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMetric {
    pub server: Uuid,
    pub date: i64,
    pub tps: f64,
    pub players_online: i64,
    pub free_disk_bytes: i64,
}

/// A value provided by a server extension, stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionValue {
    pub plugin: String,
    pub server: Uuid,
    pub name: String,
    pub value: serde_json::Value,
}

/// Upserts one server row keyed by uuid.
pub struct RegisterServerTransaction {
    server: Server,
}

impl RegisterServerTransaction {
    pub fn new(server: Server) -> Self {
        RegisterServerTransaction { server }
    }
}

#[async_trait]
impl Transaction for RegisterServerTransaction {
    fn name(&self) -> &str {
        "RegisterServerTransaction"
    }

    async fn perform(&mut self, lease: &mut ConnectionLease) -> Result<(), DbError> {
        let sql = match lease.backend() {
            crate::db::Backend::Sqlite => {
                "INSERT INTO servers (uuid, name, web_address, installed) VALUES (?, ?, ?, 1) \
                 ON CONFLICT(uuid) DO UPDATE SET \
                 name = excluded.name, web_address = excluded.web_address, installed = 1"
            }
            crate::db::Backend::MySql => {
                "INSERT INTO servers (uuid, name, web_address, installed) VALUES (?, ?, ?, 1) \
                 ON DUPLICATE KEY UPDATE \
                 name = VALUES(name), web_address = VALUES(web_address), installed = 1"
            }
        };
        lease
            .execute(
                sql,
                &[
                    self.server.uuid.into(),
                    self.server.name.clone().into(),
                    self.server.web_address.clone().into(),
                ],
            )
            .await?;
        Ok(())
    }
}

/// Upserts one player row keyed by uuid; the registration date of an
/// already-known player is left untouched.
pub struct RegisterPlayerTransaction {
    player: Player,
}

impl RegisterPlayerTransaction {
    pub fn new(player: Player) -> Self {
        RegisterPlayerTransaction { player }
    }
}

#[async_trait]
impl Transaction for RegisterPlayerTransaction {
    fn name(&self) -> &str {
        "RegisterPlayerTransaction"
    }

    async fn perform(&mut self, lease: &mut ConnectionLease) -> Result<(), DbError> {
        let sql = match lease.backend() {
            crate::db::Backend::Sqlite => {
                "INSERT INTO players (uuid, name, registered) VALUES (?, ?, ?) \
                 ON CONFLICT(uuid) DO UPDATE SET name = excluded.name"
            }
            crate::db::Backend::MySql => {
                "INSERT INTO players (uuid, name, registered) VALUES (?, ?, ?) \
                 ON DUPLICATE KEY UPDATE name = VALUES(name)"
            }
        };
        lease
            .execute(
                sql,
                &[
                    self.player.uuid.into(),
                    self.player.name.clone().into(),
                    self.player.registered.into(),
                ],
            )
            .await?;
        Ok(())
    }
}

/// Appends one finished (or live) session. Sessions are events and are
/// never updated in place.
pub struct StoreSessionTransaction {
    session: Session,
}

impl StoreSessionTransaction {
    pub fn new(session: Session) -> Self {
        StoreSessionTransaction { session }
    }
}

#[async_trait]
impl Transaction for StoreSessionTransaction {
    fn name(&self) -> &str {
        "StoreSessionTransaction"
    }

    async fn perform(&mut self, lease: &mut ConnectionLease) -> Result<(), DbError> {
        lease
            .execute(
                "INSERT INTO sessions \
                 (player_uuid, server_uuid, session_start, session_end, mob_kills, deaths, afk_ms) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                &[
                    self.session.player.into(),
                    self.session.server.into(),
                    self.session.session_start.into(),
                    self.session.session_end.into(),
                    self.session.mob_kills.into(),
                    self.session.deaths.into(),
                    self.session.afk_ms.into(),
                ],
            )
            .await?;
        Ok(())
    }
}

/// Appends one server performance sample.
pub struct StoreMetricTransaction {
    metric: ServerMetric,
}

impl StoreMetricTransaction {
    pub fn new(metric: ServerMetric) -> Self {
        StoreMetricTransaction { metric }
    }
}

#[async_trait]
impl Transaction for StoreMetricTransaction {
    fn name(&self) -> &str {
        "StoreMetricTransaction"
    }

    async fn perform(&mut self, lease: &mut ConnectionLease) -> Result<(), DbError> {
        lease
            .execute(
                "INSERT INTO server_metrics \
                 (server_uuid, date, tps, players_online, free_disk_bytes) \
                 VALUES (?, ?, ?, ?, ?)",
                &[
                    self.metric.server.into(),
                    self.metric.date.into(),
                    self.metric.tps.into(),
                    self.metric.players_online.into(),
                    self.metric.free_disk_bytes.into(),
                ],
            )
            .await?;
        Ok(())
    }
}

/// Upserts one extension-provided value keyed by (plugin, server, name).
pub struct StoreExtensionValueTransaction {
    value: ExtensionValue,
}

impl StoreExtensionValueTransaction {
    pub fn new(value: ExtensionValue) -> Self {
        StoreExtensionValueTransaction { value }
    }
}

#[async_trait]
impl Transaction for StoreExtensionValueTransaction {
    fn name(&self) -> &str {
        "StoreExtensionValueTransaction"
    }

    async fn perform(&mut self, lease: &mut ConnectionLease) -> Result<(), DbError> {
        let json = serde_json::to_string(&self.value.value)?;
        let sql = match lease.backend() {
            crate::db::Backend::Sqlite => {
                "INSERT INTO extension_values (plugin, server_uuid, value_name, value_json) \
                 VALUES (?, ?, ?, ?) \
                 ON CONFLICT(plugin, server_uuid, value_name) \
                 DO UPDATE SET value_json = excluded.value_json"
            }
            crate::db::Backend::MySql => {
                "INSERT INTO extension_values (plugin, server_uuid, value_name, value_json) \
                 VALUES (?, ?, ?, ?) \
                 ON DUPLICATE KEY UPDATE value_json = VALUES(value_json)"
            }
        };
        lease
            .execute(
                sql,
                &[
                    self.value.plugin.clone().into(),
                    self.value.server.into(),
                    self.value.name.clone().into(),
                    json.into(),
                ],
            )
            .await?;
        Ok(())
    }
}

/// All sessions recorded on one server, oldest first.
pub struct ServerSessionsQuery {
    server: Uuid,
}

impl ServerSessionsQuery {
    pub fn new(server: Uuid) -> Self {
        ServerSessionsQuery { server }
    }
}

#[async_trait]
impl Query for ServerSessionsQuery {
    type Output = Vec<Session>;

    async fn run(&self, lease: &mut ConnectionLease) -> Result<Vec<Session>, DbError> {
        let rows = lease
            .fetch_rows(
                "SELECT player_uuid, server_uuid, session_start, session_end, \
                 mob_kills, deaths, afk_ms \
                 FROM sessions WHERE server_uuid = ? ORDER BY session_start",
                &[self.server.into()],
            )
            .await?;
        rows.iter().map(session_from_row).collect()
    }
}

fn session_from_row(row: &SqlRow) -> Result<Session, DbError> {
    Ok(Session {
        player: row.uuid_at(0)?,
        server: row.uuid_at(1)?,
        session_start: row.integer_at(2)?,
        session_end: row.opt_integer_at(3)?,
        mob_kills: row.integer_at(4)?,
        deaths: row.integer_at(5)?,
        afk_ms: row.integer_at(6)?,
    })
}

/// Number of known players.
pub struct PlayerCountQuery;

#[async_trait]
impl Query for PlayerCountQuery {
    type Output = i64;

    async fn run(&self, lease: &mut ConnectionLease) -> Result<i64, DbError> {
        lease
            .fetch_scalar(
                &format!("SELECT count(*) FROM {}", schema::PLAYERS),
                &[],
            )
            .await
    }
}

impl Session {
    /// Playtime in milliseconds for a finished session; live sessions count
    /// up to now.
    pub fn length_ms(&self) -> i64 {
        self.session_end.unwrap_or_else(now_ms) - self.session_start
    }

    pub fn active_ms(&self) -> i64 {
        self.length_ms() - self.afk_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::SqlValue;

    #[test]
    fn session_round_trips_through_row_values() {
        let session = Session {
            player: Uuid::new_v4(),
            server: Uuid::new_v4(),
            session_start: 1_000,
            session_end: Some(5_000),
            mob_kills: 3,
            deaths: 1,
            afk_ms: 250,
        };
        let row = SqlRow::from(vec![
            SqlValue::from(session.player),
            SqlValue::from(session.server),
            SqlValue::Integer(session.session_start),
            SqlValue::Integer(5_000),
            SqlValue::Integer(session.mob_kills),
            SqlValue::Integer(session.deaths),
            SqlValue::Integer(session.afk_ms),
        ]);
        assert_eq!(session_from_row(&row).unwrap(), session);
    }

    #[test]
    fn session_length_subtracts_afk() {
        let session = Session {
            player: Uuid::new_v4(),
            server: Uuid::new_v4(),
            session_start: 1_000,
            session_end: Some(11_000),
            mob_kills: 0,
            deaths: 0,
            afk_ms: 4_000,
        };
        assert_eq!(session.length_ms(), 10_000);
        assert_eq!(session.active_ms(), 6_000);
    }
}
