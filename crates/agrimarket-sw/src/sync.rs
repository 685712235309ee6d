//! Background sync.
//!
//! The worker answers the `sync-data` tag by running a [`SyncHandler`].
//! Failures are returned untouched: the host reschedules failed syncs, and
//! swallowing the error here would stop that.

use async_trait::async_trait;
use tracing::debug;

use crate::scope::WorkerScope;
use crate::Result;

/// Tag of the data synchronization sync.
pub const SYNC_DATA_TAG: &str = "sync-data";

/// Routine run for a `sync-data` event.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    async fn synchronize(&self, scope: &WorkerScope) -> Result<()>;
}

/// Sync routine with nothing to do yet.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSync;

#[async_trait]
impl SyncHandler for NoopSync {
    async fn synchronize(&self, scope: &WorkerScope) -> Result<()> {
        debug!(worker = %scope.worker_id, "Nothing to synchronize");
        Ok(())
    }
}
