//! Worker behaviours.
//!
//! The host drives a worker through the [`WorkerBehavior`] event handlers.
//! Which implementation runs is decided once, from the hostname, by
//! [`select_worker`].

use std::sync::Arc;

use agrimarket_net::{Request, Response};
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::config::WorkerConfig;
use crate::environment::Environment;
use crate::lifetime::WaitUntil;
use crate::push::Notification;
use crate::scope::WorkerScope;
use crate::Result;

mod dev;
mod production;

pub use dev::DevPassthroughWorker;
pub use production::ProductionCachingWorker;

/// Event handlers of a worker.
///
/// Work that must outlive a handler is registered on the [`WaitUntil`]
/// passed to it; the host settles it before the event counts as done.
#[async_trait]
pub trait WorkerBehavior: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Version token of this worker generation.
    fn version(&self) -> &str;

    /// Install step. An error makes the worker redundant.
    async fn on_install(&self, scope: &WorkerScope, wait_until: &WaitUntil) -> Result<()>;

    /// Activate step.
    async fn on_activate(&self, scope: &WorkerScope, wait_until: &WaitUntil) -> Result<()>;

    /// Handle an intercepted request. `None` lets the request go to the
    /// network untouched.
    async fn on_fetch(&self, scope: &WorkerScope, wait_until: &WaitUntil, request: Request) -> Option<Response>;

    /// Handle a message posted by a page.
    async fn on_message(&self, _scope: &WorkerScope, _wait_until: &WaitUntil, _data: &Value) -> Result<()> {
        Ok(())
    }

    /// Handle a background sync. An error asks the host to retry later.
    async fn on_sync(&self, _scope: &WorkerScope, _tag: &str) -> Result<()> {
        Ok(())
    }

    /// Handle a push message.
    async fn on_push(&self, _scope: &WorkerScope, _wait_until: &WaitUntil, _data: Option<&[u8]>) -> Result<()> {
        Ok(())
    }

    /// Handle a click on one of this worker's notifications.
    async fn on_notification_click(
        &self,
        _scope: &WorkerScope,
        _wait_until: &WaitUntil,
        _notification: &Notification,
    ) -> Result<()> {
        Ok(())
    }
}

/// Pick the worker for a hostname: development hosts get the self-removing
/// pass-through worker, everything else the caching worker.
pub fn select_worker(config: Arc<WorkerConfig>, hostname: &str) -> Result<Arc<dyn WorkerBehavior>> {
    let environment = Environment::classify(hostname);
    info!(hostname, environment = environment.as_str(), version = %config.version, "Selecting worker");

    let worker: Arc<dyn WorkerBehavior> = match environment {
        Environment::Development => Arc::new(DevPassthroughWorker::new(&config.version)),
        Environment::Production => Arc::new(ProductionCachingWorker::new(config)?),
    };
    Ok(worker)
}
