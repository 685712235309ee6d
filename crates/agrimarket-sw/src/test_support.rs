//! In-crate fakes for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agrimarket_net::{Fetcher, NetError, Request, Response};
use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use tokio::sync::{mpsc, RwLock};
use url::Url;

use crate::cache::SharedCacheStorage;
use crate::clients::Clients;
use crate::container::ServiceWorkerEvent;
use crate::push::NotificationTray;
use crate::registration::{ServiceWorker, ServiceWorkerRegistration};
use crate::scope::WorkerScope;
use crate::worker::DevPassthroughWorker;

/// Build a header-less response.
pub fn response(url: &Url, status: u16, body: &str) -> Response {
    Response::from_parts(
        url.clone(),
        StatusCode::from_u16(status).unwrap(),
        HeaderMap::new(),
        body.to_string(),
    )
}

/// Scriptable network: fixed routes, an online switch, an optional delay,
/// and a log of every URL requested.
#[derive(Default)]
pub struct FakeNetwork {
    routes: Mutex<HashMap<String, (u16, String)>>,
    offline: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<String>>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, url: &str, status: u16, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, body.to_string()));
    }

    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == url).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Fetcher for FakeNetwork {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        let key = request.cache_key();
        self.calls.lock().unwrap().push(key.clone());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::Offline(key));
        }

        let route = self.routes.lock().unwrap().get(&key).cloned();
        Ok(match route {
            Some((status, body)) => response(&request.url, status, &body),
            None => response(&request.url, 404, "Not Found"),
        })
    }
}

/// A worker scope over fresh host state, with handles to inspect it.
pub struct ScopeHarness {
    pub scope: WorkerScope,
    pub clients: Arc<RwLock<Clients>>,
    pub registration: Arc<RwLock<ServiceWorkerRegistration>>,
    pub notifications: Arc<RwLock<NotificationTray>>,
    pub events: mpsc::UnboundedReceiver<ServiceWorkerEvent>,
}

impl ScopeHarness {
    /// Scope for a worker loaded from `script_url`, registered for the
    /// script's directory.
    pub fn new(script_url: &str, network: Arc<FakeNetwork>) -> Self {
        let location = Url::parse(script_url).unwrap();
        let scope_url = location.join("./").unwrap();
        let worker_id = ServiceWorker::new(location.clone(), Arc::new(DevPassthroughWorker::new("test"))).id;

        let clients = Arc::new(RwLock::new(Clients::new()));
        let registration = Arc::new(RwLock::new(ServiceWorkerRegistration::new(scope_url)));
        let notifications = Arc::new(RwLock::new(NotificationTray::default()));
        let (tx, events) = mpsc::unbounded_channel();

        let scope = WorkerScope::new(
            worker_id,
            location,
            SharedCacheStorage::default(),
            network,
            clients.clone(),
            registration.clone(),
            notifications.clone(),
            tx,
        );

        Self {
            scope,
            clients,
            registration,
            notifications,
            events,
        }
    }
}
