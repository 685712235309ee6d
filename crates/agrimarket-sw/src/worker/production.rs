use std::sync::Arc;

use agrimarket_net::{Request, Response};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::WorkerBehavior;
use crate::config::{CacheNames, WorkerConfig};
use crate::lifetime::WaitUntil;
use crate::message::ControlMessage;
use crate::push::{self, Notification};
use crate::router::{RouteDecision, Router};
use crate::scope::WorkerScope;
use crate::strategy::{self, StrategyContext};
use crate::sync::{NoopSync, SyncHandler, SYNC_DATA_TAG};
use crate::{Result, ServiceWorkerError};

/// The caching worker used on production hosts.
pub struct ProductionCachingWorker {
    config: Arc<WorkerConfig>,
    router: Router,
    names: CacheNames,
    offline_message: Arc<str>,
    sync_handler: Arc<dyn SyncHandler>,
}

impl ProductionCachingWorker {
    pub fn new(config: Arc<WorkerConfig>) -> Result<Self> {
        let router = Router::new(&config)?;
        let names = config.cache_names();
        let offline_message = Arc::from(config.offline_message.as_str());
        Ok(Self {
            config,
            router,
            names,
            offline_message,
            sync_handler: Arc::new(NoopSync),
        })
    }

    /// Replace the routine run for `sync-data`.
    pub fn with_sync_handler(mut self, handler: Arc<dyn SyncHandler>) -> Self {
        self.sync_handler = handler;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    fn resolve_all<'a>(&self, scope: &WorkerScope, paths: impl IntoIterator<Item = &'a String>) -> Result<Vec<Url>> {
        paths.into_iter().map(|path| scope.resolve(path)).collect()
    }

    async fn cache_urls(&self, scope: &WorkerScope, urls: &[String]) -> Result<()> {
        let urls = self.resolve_all(scope, urls)?;
        scope
            .caches
            .add_all(&self.names.static_cache, &urls, scope.fetcher())
            .await?;
        info!(count = urls.len(), cache = %self.names.static_cache, "URLs cached on request");
        Ok(())
    }
}

#[async_trait]
impl WorkerBehavior for ProductionCachingWorker {
    fn name(&self) -> &'static str {
        "production-caching"
    }

    fn version(&self) -> &str {
        &self.config.version
    }

    async fn on_install(&self, scope: &WorkerScope, _wait_until: &WaitUntil) -> Result<()> {
        let urls = self.resolve_all(scope, &self.config.precache_manifest)?;
        scope
            .caches
            .add_all(&self.names.static_cache, &urls, scope.fetcher())
            .await
            .map_err(|e| ServiceWorkerError::InstallFailed(e.to_string()))?;

        info!(
            version = %self.config.version,
            assets = urls.len(),
            cache = %self.names.static_cache,
            "App shell pre-cached"
        );
        scope.skip_waiting();
        Ok(())
    }

    async fn on_activate(&self, scope: &WorkerScope, _wait_until: &WaitUntil) -> Result<()> {
        let mut evicted = 0;
        for name in scope.caches.keys().await {
            if self.config.is_stale_cache(&name) {
                debug!(cache = %name, "Evicting stale cache");
                scope.caches.delete(&name).await;
                evicted += 1;
            }
        }
        for name in self.names.all() {
            scope.caches.open(name).await;
        }

        let claimed = scope.claim_clients().await;
        info!(version = %self.config.version, evicted, claimed, "Worker activated");
        Ok(())
    }

    async fn on_fetch(&self, scope: &WorkerScope, wait_until: &WaitUntil, request: Request) -> Option<Response> {
        let (strategy, category) = match self.router.route(&request) {
            RouteDecision::Bypass(reason) => {
                debug!(url = %request.url, ?reason, "Bypassing worker");
                return None;
            }
            RouteDecision::Cache { strategy, category } => (strategy, category),
        };

        let ctx = StrategyContext {
            caches: scope.caches.clone(),
            fetcher: scope.fetcher_handle(),
            wait_until: wait_until.clone(),
            offline_message: Arc::clone(&self.offline_message),
        };
        Some(strategy::execute(strategy, &ctx, request, self.names.get(category)).await)
    }

    async fn on_message(&self, scope: &WorkerScope, _wait_until: &WaitUntil, data: &Value) -> Result<()> {
        let Some(message) = ControlMessage::parse(data) else {
            return Ok(());
        };
        debug!(?message, "Control message");

        match message {
            ControlMessage::SkipWaiting => scope.skip_waiting(),
            ControlMessage::CacheUrls { urls } => self.cache_urls(scope, &urls).await?,
            ControlMessage::ClearCache => {
                let deleted = scope.caches.clear().await;
                info!(deleted, "All caches cleared");
            }
        }
        Ok(())
    }

    async fn on_sync(&self, scope: &WorkerScope, tag: &str) -> Result<()> {
        if tag != SYNC_DATA_TAG {
            debug!(tag, "Ignoring sync tag");
            return Ok(());
        }
        self.sync_handler.synchronize(scope).await.map_err(|e| {
            warn!(tag, error = %e, "Background sync failed");
            e
        })
    }

    async fn on_push(&self, scope: &WorkerScope, _wait_until: &WaitUntil, data: Option<&[u8]>) -> Result<()> {
        push::show_push(scope, data).await;
        Ok(())
    }

    async fn on_notification_click(
        &self,
        scope: &WorkerScope,
        _wait_until: &WaitUntil,
        notification: &Notification,
    ) -> Result<()> {
        push::open_notification_target(scope, notification).await
    }
}
