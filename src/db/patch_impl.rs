//! The declared-order schema patch list.
//!
//! Each patch upgrades a database created by an older release to the schema
//! in `schema.rs`. Fresh databases are created at the latest schema, so on
//! first init every patch reports itself as already applied.

use async_trait::async_trait;

use crate::db::connection::{Backend, ConnectionLease};
use crate::db::patch::Patch;
use crate::db::schema;
use crate::error::DbError;

/// Declared order. Append only; reordering would change which schema shape
/// each patch may assume.
pub(crate) fn patches() -> Vec<Box<dyn Patch>> {
    vec![
        Box::new(LegacySchemaVersionTablePatch),
        Box::new(SessionAfkTimePatch),
        Box::new(MetricsDiskUsagePatch),
        Box::new(ExtensionValueLengthPatch),
    ]
}

/// Early releases tracked schema evolution in a `schema_version` table;
/// the self-checking patch list made it redundant.
struct LegacySchemaVersionTablePatch;

#[async_trait]
impl Patch for LegacySchemaVersionTablePatch {
    fn name(&self) -> &'static str {
        "LegacySchemaVersionTablePatch"
    }

    async fn has_been_applied(&self, lease: &mut ConnectionLease) -> Result<bool, DbError> {
        Ok(!lease.has_table("schema_version").await?)
    }

    async fn apply(&self, lease: &mut ConnectionLease) -> Result<(), DbError> {
        lease.execute("DROP TABLE schema_version", &[]).await?;
        Ok(())
    }
}

/// Adds AFK-time tracking to sessions stored before it was measured.
struct SessionAfkTimePatch;

#[async_trait]
impl Patch for SessionAfkTimePatch {
    fn name(&self) -> &'static str {
        "SessionAfkTimePatch"
    }

    async fn has_been_applied(&self, lease: &mut ConnectionLease) -> Result<bool, DbError> {
        lease.has_column(schema::SESSIONS, "afk_ms").await
    }

    async fn apply(&self, lease: &mut ConnectionLease) -> Result<(), DbError> {
        lease
            .execute(
                "ALTER TABLE sessions ADD COLUMN afk_ms BIGINT NOT NULL DEFAULT 0",
                &[],
            )
            .await?;
        Ok(())
    }
}

/// Adds free-disk sampling to server metrics. `-1` marks rows from before
/// the column existed.
struct MetricsDiskUsagePatch;

#[async_trait]
impl Patch for MetricsDiskUsagePatch {
    fn name(&self) -> &'static str {
        "MetricsDiskUsagePatch"
    }

    async fn has_been_applied(&self, lease: &mut ConnectionLease) -> Result<bool, DbError> {
        lease
            .has_column(schema::SERVER_METRICS, "free_disk_bytes")
            .await
    }

    async fn apply(&self, lease: &mut ConnectionLease) -> Result<(), DbError> {
        lease
            .execute(
                "ALTER TABLE server_metrics ADD COLUMN free_disk_bytes BIGINT NOT NULL DEFAULT -1",
                &[],
            )
            .await?;
        Ok(())
    }
}

/// Widens the extension value column on MySQL from the original 250
/// characters; longer values used to be truncated by extensions that store
/// serialized tables. SQLite TEXT is unbounded, so nothing to do there.
struct ExtensionValueLengthPatch;

const EXTENSION_VALUE_LENGTH: i64 = 500;

#[async_trait]
impl Patch for ExtensionValueLengthPatch {
    fn name(&self) -> &'static str {
        "ExtensionValueLengthPatch"
    }

    async fn has_been_applied(&self, lease: &mut ConnectionLease) -> Result<bool, DbError> {
        match lease.backend() {
            Backend::Sqlite => Ok(true),
            Backend::MySql => {
                let length: Option<i64> = lease
                    .fetch_optional_scalar(
                        "SELECT CAST(character_maximum_length AS SIGNED) \
                         FROM information_schema.columns \
                         WHERE table_schema = DATABASE() \
                           AND table_name = ? AND column_name = ?",
                        &[
                            schema::EXTENSION_VALUES.into(),
                            "value_json".into(),
                        ],
                    )
                    .await?;
                Ok(length.is_some_and(|l| l >= EXTENSION_VALUE_LENGTH))
            }
        }
    }

    async fn apply(&self, lease: &mut ConnectionLease) -> Result<(), DbError> {
        lease
            .execute(
                "ALTER TABLE extension_values MODIFY value_json VARCHAR(500) NOT NULL",
                &[],
            )
            .await?;
        Ok(())
    }
}
