use async_trait::async_trait;
use tracing::{debug, info};

use crate::db::connection::ConnectionLease;
use crate::error::DbError;

/// A named, idempotent schema change with a self-check.
///
/// Patches are immutable and declared in a fixed order
/// ([`crate::db::patch_impl::patches`]); the whole list is re-run on every
/// `init()`, with already-applied patches skipping cheaply. Ordering is
/// owned by the engine, never by the patch itself.
#[async_trait]
pub trait Patch: Send + Sync {
    fn name(&self) -> &'static str;

    async fn has_been_applied(&self, lease: &mut ConnectionLease) -> Result<bool, DbError>;

    async fn apply(&self, lease: &mut ConnectionLease) -> Result<(), DbError>;
}

/// Runs the patch list in declared order on the initializing task, before
/// the handle is advertised as open. Each application is wrapped in its own
/// begin/commit; the first failure rolls back and aborts initialization.
pub(crate) async fn apply_all(
    lease: &mut ConnectionLease,
    patches: &[Box<dyn Patch>],
) -> Result<(), DbError> {
    for patch in patches {
        if patch.has_been_applied(lease).await.map_err(|e| wrap(patch.name(), e))? {
            debug!(patch = patch.name(), "schema patch already applied");
            continue;
        }

        info!(patch = patch.name(), "applying schema patch");
        lease.begin().await?;
        match patch.apply(lease).await {
            Ok(()) => lease.commit().await?,
            Err(e) => {
                let _ = lease.rollback().await;
                return Err(wrap(patch.name(), e));
            }
        }
    }
    Ok(())
}

fn wrap(name: &str, source: DbError) -> DbError {
    DbError::Patch {
        name: name.to_string(),
        source: Box::new(source),
    }
}
