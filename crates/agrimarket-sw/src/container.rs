//! Service worker container (`navigator.serviceWorker` plus the host's
//! event dispatch).
//!
//! The container owns the registrations, the shared cache storage, the
//! open pages and the notification tray. It runs the worker lifecycle,
//! routes intercepted requests to the controlling worker and dispatches
//! message, sync, push and notification-click events.

use std::sync::Arc;
use std::time::Duration;

use agrimarket_common::{retry_with_backoff, RetryConfig};
use agrimarket_net::{Fetcher, NetError, Request, Response};
use hashbrown::HashMap;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::SharedCacheStorage;
use crate::clients::{Client, Clients};
use crate::lifetime::WaitUntil;
use crate::push::{Notification, NotificationTray};
use crate::registration::{ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState};
use crate::scope::WorkerScope;
use crate::worker::WorkerBehavior;
use crate::{Result, ServiceWorkerError};

type SharedRegistration = Arc<RwLock<ServiceWorkerRegistration>>;

/// Host limits.
#[derive(Debug, Clone)]
pub struct ContainerOptions {
    /// Upper bound on how long an event may keep the worker alive.
    pub lifetime_timeout: Duration,
    /// Rescheduling policy for failing background syncs.
    pub sync_retry: RetryConfig,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            lifetime_timeout: Duration::from_secs(5 * 60),
            sync_retry: RetryConfig::default(),
        }
    }
}

/// Registration options.
#[derive(Debug, Clone, Default)]
pub struct RegistrationOptions {
    /// Scope URL. Defaults to the directory of the script.
    pub scope: Option<String>,
}

/// Which worker of a registration receives a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTarget {
    Active,
    Waiting,
}

/// Service worker events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// State changed.
    StateChange {
        worker_id: ServiceWorkerId,
        state: ServiceWorkerState,
    },
    /// A new worker started installing.
    UpdateFound { scope: String },
    /// A page got a new controller.
    ControllerChange {
        client_id: String,
        worker_id: ServiceWorkerId,
    },
    /// A registration was removed.
    Unregistered { scope: String },
}

/// Service worker container.
pub struct ServiceWorkerContainer {
    /// Registrations by scope.
    registrations: RwLock<HashMap<String, SharedRegistration>>,

    caches: SharedCacheStorage,
    clients: Arc<RwLock<Clients>>,
    notifications: Arc<RwLock<NotificationTray>>,
    fetcher: Arc<dyn Fetcher>,

    /// Lifetime extensions of fetch events.
    background: WaitUntil,

    options: ContainerOptions,

    /// Event sender for state changes.
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a new container.
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        caches: SharedCacheStorage,
        options: ContainerOptions,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                registrations: RwLock::new(HashMap::new()),
                caches,
                clients: Arc::new(RwLock::new(Clients::new())),
                notifications: Arc::new(RwLock::new(NotificationTray::default())),
                fetcher,
                background: WaitUntil::new(),
                options,
                event_tx,
            },
            event_rx,
        )
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_state(&self, worker_id: ServiceWorkerId, state: ServiceWorkerState) {
        self.emit(ServiceWorkerEvent::StateChange { worker_id, state });
    }

    fn scope_for(&self, worker: &ServiceWorker, registration: &SharedRegistration) -> WorkerScope {
        WorkerScope::new(
            worker.id,
            worker.script_url.clone(),
            self.caches.clone(),
            Arc::clone(&self.fetcher),
            Arc::clone(&self.clients),
            Arc::clone(registration),
            Arc::clone(&self.notifications),
            self.event_tx.clone(),
        )
    }

    /// Register a worker script and run its install step. When nothing is
    /// active yet, or the new worker asks to skip waiting, it is activated
    /// right away.
    pub async fn register(
        &self,
        script_url: &str,
        options: RegistrationOptions,
        behavior: Arc<dyn WorkerBehavior>,
    ) -> Result<ServiceWorkerId> {
        let script_url =
            Url::parse(script_url).map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?;

        let scope = match options.scope {
            Some(s) => script_url
                .join(&s)
                .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?,
            None => script_url
                .join("./")
                .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?,
        };
        let scope_str = scope.to_string();

        let registration = {
            let mut registrations = self.registrations.write().await;
            registrations
                .entry(scope_str.clone())
                .or_insert_with(|| Arc::new(RwLock::new(ServiceWorkerRegistration::new(scope))))
                .clone()
        };

        let worker = ServiceWorker::new(script_url, behavior);
        let worker_id = worker.id;
        let worker_scope = self.scope_for(&worker, &registration);
        registration.write().await.update(worker.clone());

        info!(scope = %scope_str, worker = %worker_id, version = %worker.version, "Installing worker");
        self.emit(ServiceWorkerEvent::UpdateFound { scope: scope_str.clone() });
        self.emit_state(worker_id, ServiceWorkerState::Installing);

        let wait_until = WaitUntil::new();
        let installed = match worker.behavior.on_install(&worker_scope, &wait_until).await {
            Ok(()) => wait_until.settle_within(self.options.lifetime_timeout).await,
            Err(e) => Err(e),
        };

        if let Err(e) = installed {
            registration.write().await.install_failed();
            self.emit_state(worker_id, ServiceWorkerState::Redundant);
            warn!(scope = %scope_str, worker = %worker_id, error = %e, "Install failed");
            return Err(match e {
                ServiceWorkerError::InstallFailed(message) => ServiceWorkerError::InstallFailed(message),
                other => ServiceWorkerError::InstallFailed(other.to_string()),
            });
        }

        let has_active = {
            let mut registration = registration.write().await;
            registration.install_complete();
            registration.active.is_some()
        };
        self.emit_state(worker_id, ServiceWorkerState::Installed);

        if worker_scope.take_skip_waiting() || !has_active {
            self.activate_waiting(&registration).await;
        } else {
            debug!(worker = %worker_id, "Worker waiting for activation");
        }

        Ok(worker_id)
    }

    /// Activate the waiting worker of a registration, if any.
    async fn activate_waiting(&self, registration: &SharedRegistration) -> Option<ServiceWorkerId> {
        let worker = registration.write().await.activate()?;
        self.emit_state(worker.id, ServiceWorkerState::Activating);

        let worker_scope = self.scope_for(&worker, registration);
        let wait_until = WaitUntil::new();
        let activated = match worker.behavior.on_activate(&worker_scope, &wait_until).await {
            Ok(()) => wait_until.settle_within(self.options.lifetime_timeout).await,
            Err(e) => Err(e),
        };
        if let Err(e) = activated {
            warn!(worker = %worker.id, error = %e, "Activate step failed");
        }

        let (completed, unregistered, scope) = {
            let mut registration = registration.write().await;
            let completed = registration.activation_complete(worker.id);
            (completed, registration.unregistered, registration.scope.to_string())
        };

        if completed {
            self.emit_state(worker.id, ServiceWorkerState::Activated);
            info!(scope = %scope, worker = %worker.id, version = %worker.version, "Worker active");
        } else if unregistered {
            self.emit_state(worker.id, ServiceWorkerState::Redundant);
            self.registrations
                .write()
                .await
                .retain(|_, r| !Arc::ptr_eq(r, registration));
            info!(scope = %scope, "Worker removed its registration");
        }
        Some(worker.id)
    }

    /// Activate the waiting worker of the registration for `scope`.
    pub async fn activate(&self, scope: &str) -> Result<Option<ServiceWorkerId>> {
        let registration = self.lookup(scope).await?;
        Ok(self.activate_waiting(&registration).await)
    }

    async fn lookup(&self, scope: &str) -> Result<SharedRegistration> {
        self.registrations
            .read()
            .await
            .get(scope)
            .cloned()
            .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))
    }

    /// The registration whose scope is the longest prefix of `url`.
    async fn registration_for(&self, url: &Url) -> Option<SharedRegistration> {
        self.registrations
            .read()
            .await
            .iter()
            .filter(|(scope, _)| url.as_str().starts_with(scope.as_str()))
            .max_by_key(|(scope, _)| scope.len())
            .map(|(_, registration)| Arc::clone(registration))
    }

    /// The active worker of the registration for `scope`.
    async fn active_worker(&self, scope: &str) -> Result<(SharedRegistration, ServiceWorker)> {
        let registration = self.lookup(scope).await?;
        let worker = registration
            .read()
            .await
            .controller()
            .cloned()
            .ok_or_else(|| ServiceWorkerError::StateError(format!("no active worker for {scope}")))?;
        Ok((registration, worker))
    }

    /// Post a control message to a worker of the registration for `scope`.
    pub async fn post_message(&self, scope: &str, target: MessageTarget, data: Value) -> Result<()> {
        let registration = self.lookup(scope).await?;
        let worker = {
            let registration = registration.read().await;
            match target {
                MessageTarget::Active => registration.active.clone(),
                MessageTarget::Waiting => registration.waiting.clone(),
            }
        }
        .ok_or_else(|| ServiceWorkerError::NotFound(format!("{target:?} worker for {scope}")))?;

        let worker_scope = self.scope_for(&worker, &registration);
        let wait_until = WaitUntil::new();
        let handled = worker.behavior.on_message(&worker_scope, &wait_until, &data).await;
        let settled = wait_until.settle_within(self.options.lifetime_timeout).await;

        if worker_scope.take_skip_waiting() && registration.read().await.waiting.is_some() {
            self.activate_waiting(&registration).await;
        }

        handled.and(settled)
    }

    /// Route a request through the worker controlling it. Requests carrying
    /// a referrer belong to that page; others are matched by their own URL.
    /// Without a controller, or when the worker declines, the request goes
    /// to the network.
    pub async fn handle_fetch(&self, request: Request) -> std::result::Result<Response, NetError> {
        let page = request.referrer.clone().unwrap_or_else(|| request.url.clone());

        if let Some(registration) = self.registration_for(&page).await {
            let controller = registration.read().await.controller().cloned();
            if let Some(worker) = controller {
                let worker_scope = self.scope_for(&worker, &registration);
                if let Some(response) = worker
                    .behavior
                    .on_fetch(&worker_scope, &self.background, request.clone())
                    .await
                {
                    return Ok(response);
                }
            }
        }

        self.fetcher.fetch(request).await
    }

    /// Wait for background work started by fetch events.
    pub async fn wait_for_background(&self) -> Result<()> {
        self.background.settle_within(self.options.lifetime_timeout).await
    }

    /// Fire a background sync, rescheduling it with back-off while it fails.
    pub async fn dispatch_sync(&self, scope: &str, tag: &str) -> Result<()> {
        let (registration, worker) = self.active_worker(scope).await?;
        let worker_scope = self.scope_for(&worker, &registration);

        retry_with_backoff(&self.options.sync_retry, || {
            let behavior = Arc::clone(&worker.behavior);
            let worker_scope = worker_scope.clone();
            async move { behavior.on_sync(&worker_scope, tag).await }
        })
        .await
        .map_err(|e| match e {
            ServiceWorkerError::SyncFailed(message) => ServiceWorkerError::SyncFailed(message),
            other => ServiceWorkerError::SyncFailed(other.to_string()),
        })
    }

    /// Deliver a push message to the active worker.
    pub async fn dispatch_push(&self, scope: &str, data: Option<&[u8]>) -> Result<()> {
        let (registration, worker) = self.active_worker(scope).await?;
        let worker_scope = self.scope_for(&worker, &registration);
        let wait_until = WaitUntil::new();
        worker.behavior.on_push(&worker_scope, &wait_until, data).await?;
        wait_until.settle_within(self.options.lifetime_timeout).await
    }

    /// Click the notification with `tag`.
    pub async fn notification_click(&self, scope: &str, tag: &str) -> Result<()> {
        let notification = self
            .notifications
            .read()
            .await
            .get(tag)
            .cloned()
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("notification '{tag}'")))?;

        let (registration, worker) = self.active_worker(scope).await?;
        let worker_scope = self.scope_for(&worker, &registration);
        let wait_until = WaitUntil::new();
        worker
            .behavior
            .on_notification_click(&worker_scope, &wait_until, &notification)
            .await?;
        wait_until.settle_within(self.options.lifetime_timeout).await
    }

    /// Scope of the registration covering `url`.
    pub async fn get_registration(&self, url: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        let registration = self.registration_for(&url).await?;
        let scope = registration.read().await.scope.to_string();
        Some(scope)
    }

    /// Scopes of every registration, sorted.
    pub async fn get_registrations(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self.registrations.read().await.keys().cloned().collect();
        scopes.sort();
        scopes
    }

    /// Snapshot of the registration for `scope`.
    pub async fn registration(&self, scope: &str) -> Option<ServiceWorkerRegistration> {
        let registration = self.lookup(scope).await.ok()?;
        let snapshot = registration.read().await.clone();
        Some(snapshot)
    }

    /// Unregister a service worker.
    pub async fn unregister(&self, scope: &str) -> Result<bool> {
        let Some(registration) = self.registrations.write().await.remove(scope) else {
            return Ok(false);
        };
        registration.write().await.unregister();
        self.emit(ServiceWorkerEvent::Unregistered {
            scope: scope.to_string(),
        });
        info!(scope, "Registration removed");
        Ok(true)
    }

    /// Open a page. It is not controlled until a worker claims it.
    pub async fn open_page(&self, url: Url) -> Client {
        let client = Client::window(url);
        self.clients.write().await.add(client.clone());
        client
    }

    pub async fn client(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    /// Every open page, sorted by id.
    pub async fn clients(&self) -> Vec<Client> {
        let clients = self.clients.read().await;
        let mut all: Vec<Client> = clients.iter().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Notifications currently shown.
    pub async fn notifications(&self) -> Vec<Notification> {
        self.notifications.read().await.list().to_vec()
    }

    pub fn caches(&self) -> &SharedCacheStorage {
        &self.caches
    }
}
