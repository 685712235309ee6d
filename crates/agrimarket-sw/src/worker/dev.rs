use agrimarket_net::{Request, Response};
use async_trait::async_trait;
use tracing::{info, warn};

use super::WorkerBehavior;
use crate::clients::ClientMatchOptions;
use crate::lifetime::WaitUntil;
use crate::scope::WorkerScope;
use crate::Result;

/// Worker for local and private-network hosts.
///
/// It never intercepts anything. Once active it deletes every cache,
/// unregisters itself and reloads every open page so that a stale worker
/// from an earlier production build cannot linger on a development machine.
#[derive(Debug, Clone)]
pub struct DevPassthroughWorker {
    version: String,
}

impl DevPassthroughWorker {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
        }
    }
}

#[async_trait]
impl WorkerBehavior for DevPassthroughWorker {
    fn name(&self) -> &'static str {
        "dev-passthrough"
    }

    fn version(&self) -> &str {
        &self.version
    }

    async fn on_install(&self, scope: &WorkerScope, _wait_until: &WaitUntil) -> Result<()> {
        scope.skip_waiting();
        Ok(())
    }

    async fn on_activate(&self, scope: &WorkerScope, _wait_until: &WaitUntil) -> Result<()> {
        let deleted = scope.caches.clear().await;
        scope.unregister().await;

        let pages = scope.match_clients(&ClientMatchOptions::all_windows()).await;
        for page in &pages {
            if let Err(e) = scope.navigate_client(&page.id, page.url.clone()).await {
                warn!(client = %page.id, error = %e, "Reload failed");
            }
        }

        info!(
            caches_deleted = deleted,
            pages_reloaded = pages.len(),
            "Development host, worker removed"
        );
        Ok(())
    }

    async fn on_fetch(&self, _scope: &WorkerScope, _wait_until: &WaitUntil, _request: Request) -> Option<Response> {
        None
    }
}
