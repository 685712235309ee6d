//! Shared setup for the worker integration tests: a real `ResourceLoader`
//! behind an on/off switch, talking to a `wiremock` origin.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agrimarket_common::RetryConfig;
use agrimarket_net::{Fetcher, LoaderConfig, NetError, Request, RequestDestination, ResourceLoader, Response};
use agrimarket_sw::{
    ContainerOptions, ProductionCachingWorker, RegistrationOptions, ServiceWorkerContainer,
    ServiceWorkerId, SharedCacheStorage, WorkerBehavior, WorkerConfig,
};
use async_trait::async_trait;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("agrimarket_sw=debug")
        .with_test_writer()
        .try_init();
}

/// Real network with an off switch.
pub struct SwitchableNetwork {
    loader: ResourceLoader,
    online: AtomicBool,
}

impl SwitchableNetwork {
    pub fn new() -> Arc<Self> {
        let config = LoaderConfig {
            default_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        Arc::new(Self {
            loader: ResourceLoader::new(config).unwrap(),
            online: AtomicBool::new(true),
        })
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for SwitchableNetwork {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(NetError::Offline(request.url.to_string()));
        }
        self.loader.fetch(request).await
    }
}

/// Serve every manifest path with its own path as the body.
pub async fn serve_manifest(server: &MockServer, config: &WorkerConfig) {
    for asset in &config.precache_manifest {
        Mock::given(method("GET"))
            .and(path(asset.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string(asset.as_str()))
            .mount(server)
            .await;
    }
}

pub fn production(config: WorkerConfig) -> Arc<dyn WorkerBehavior> {
    Arc::new(ProductionCachingWorker::new(Arc::new(config)).unwrap())
}

/// No-cache markers narrowed to hot-module reload, so data requests reach
/// the network-first rule.
pub fn data_caching_config() -> WorkerConfig {
    WorkerConfig {
        no_cache_path_markers: vec!["hot-update".to_string()],
        no_cache_host_markers: Vec::new(),
        ..Default::default()
    }
}

pub struct Harness {
    pub server: MockServer,
    pub network: Arc<SwitchableNetwork>,
    pub container: ServiceWorkerContainer,
    pub caches: SharedCacheStorage,
    pub config: WorkerConfig,
    pub scope: String,
}

impl Harness {
    /// An origin serving the manifest and an empty, uninstalled host.
    pub async fn new(config: WorkerConfig) -> Self {
        init_test_logging();
        let server = MockServer::start().await;
        serve_manifest(&server, &config).await;

        let network = SwitchableNetwork::new();
        let caches = SharedCacheStorage::default();
        let options = ContainerOptions {
            sync_retry: RetryConfig::attempts(config.sync_retry_attempts).with_initial_delay(Duration::from_millis(1)),
            ..Default::default()
        };
        let (container, _events) = ServiceWorkerContainer::new(network.clone(), caches.clone(), options);
        let scope = format!("{}/", server.uri());

        Self {
            server,
            network,
            container,
            caches,
            config,
            scope,
        }
    }

    /// Origin plus an installed, active caching worker.
    pub async fn installed(config: WorkerConfig) -> Self {
        let harness = Self::new(config).await;
        harness.install(harness.config.clone()).await.unwrap();
        harness
    }

    pub async fn install(&self, config: WorkerConfig) -> agrimarket_sw::Result<ServiceWorkerId> {
        self.container
            .register(&self.script_url(), RegistrationOptions::default(), production(config))
            .await
    }

    pub fn script_url(&self) -> String {
        format!("{}/sw.js", self.server.uri())
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&self.server.uri()).unwrap().join(path).unwrap()
    }

    pub fn cache_name(&self, category: agrimarket_sw::CacheCategory) -> String {
        self.config.cache_name(category)
    }

    pub async fn fetch(&self, request: Request) -> Response {
        self.container.handle_fetch(request).await.unwrap()
    }

    pub async fn get(&self, path: &str) -> Response {
        self.fetch(Request::get(self.url(path))).await
    }

    pub async fn get_as(&self, path: &str, destination: RequestDestination) -> Response {
        self.fetch(Request::get(self.url(path)).destination(destination)).await
    }
}
