//! Event lifetime extension ("wait until").
//!
//! Work that must finish even after a handler has returned (cache writes,
//! deletions) is spawned through a [`WaitUntil`]. The host awaits
//! [`WaitUntil::settle`] before it considers the event done.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use agrimarket_common::{with_timeout, AgriError};
use futures::FutureExt;
use tokio::task::{JoinError, JoinHandle};
use tracing::{trace, warn};

use crate::{Result, ServiceWorkerError};

type Task = JoinHandle<Result<()>>;

#[derive(Debug, Default)]
struct Tracked {
    running: Vec<(&'static str, Task)>,
    /// First failure among tasks reaped before anyone settled.
    failure: Option<ServiceWorkerError>,
}

impl Tracked {
    /// Drop finished tasks, keeping the first failure.
    fn reap(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.running).into_iter().partition(|(_, h)| h.is_finished());
        self.running = running;

        for (label, handle) in finished {
            if let Some(joined) = handle.now_or_never() {
                if let Err(e) = outcome(label, joined) {
                    self.failure.get_or_insert(e);
                }
            }
        }
    }
}

fn outcome(label: &'static str, joined: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    let result = match joined {
        Ok(result) => result,
        Err(join_error) => Err(ServiceWorkerError::from(AgriError::internal(format!(
            "task '{label}' did not complete: {join_error}"
        )))),
    };
    if let Err(e) = &result {
        warn!(label, error = %e, "Lifetime extension failed");
    }
    result
}

/// Tracker for background tasks that keep an event alive.
///
/// Finished tasks are dropped whenever a new one is added, so a tracker
/// that lives as long as the host stays bounded by the work in flight.
#[derive(Debug, Clone, Default)]
pub struct WaitUntil {
    tracked: Arc<Mutex<Tracked>>,
}

impl WaitUntil {
    pub fn new() -> Self {
        Self::default()
    }

    fn tracked(&self) -> MutexGuard<'_, Tracked> {
        self.tracked.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn `future` and keep the event alive until it completes.
    pub fn extend<F>(&self, label: &'static str, future: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        trace!(label, "Extending event lifetime");
        let handle = tokio::spawn(future);
        let mut tracked = self.tracked();
        tracked.reap();
        tracked.running.push((label, handle));
    }

    /// Number of tasks still running.
    pub fn pending(&self) -> usize {
        let mut tracked = self.tracked();
        tracked.reap();
        tracked.running.len()
    }

    /// Await every registered task, including tasks registered while
    /// settling. Returns the first failure.
    pub async fn settle(&self) -> Result<()> {
        let mut first_error = None;

        loop {
            let batch: Vec<_> = std::mem::take(&mut self.tracked().running);
            if batch.is_empty() {
                break;
            }
            for (label, handle) in batch {
                if let Err(e) = outcome(label, handle.await) {
                    first_error.get_or_insert(e);
                }
            }
        }

        match self.tracked().failure.take().or(first_error) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// [`settle`](Self::settle), but give up after `timeout`.
    pub async fn settle_within(&self, timeout: Duration) -> Result<()> {
        with_timeout(timeout, self.settle()).await?
    }
}
