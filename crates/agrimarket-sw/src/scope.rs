//! The global scope a worker's handlers run against.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use agrimarket_net::Fetcher;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use url::Url;

use crate::cache::SharedCacheStorage;
use crate::clients::{Client, ClientMatchOptions, Clients};
use crate::container::ServiceWorkerEvent;
use crate::push::{Notification, NotificationTray};
use crate::registration::{ServiceWorkerId, ServiceWorkerRegistration};
use crate::{Result, ServiceWorkerError};

/// Host facilities visible to one worker while it handles one event.
#[derive(Clone)]
pub struct WorkerScope {
    /// The worker handling the event.
    pub worker_id: ServiceWorkerId,

    /// Script URL of the worker.
    pub location: Url,

    /// Cache storage.
    pub caches: SharedCacheStorage,

    fetcher: Arc<dyn Fetcher>,
    clients: Arc<RwLock<Clients>>,
    registration: Arc<RwLock<ServiceWorkerRegistration>>,
    notifications: Arc<RwLock<NotificationTray>>,
    events: mpsc::UnboundedSender<ServiceWorkerEvent>,
    skip_waiting: Arc<AtomicBool>,
}

impl WorkerScope {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        worker_id: ServiceWorkerId,
        location: Url,
        caches: SharedCacheStorage,
        fetcher: Arc<dyn Fetcher>,
        clients: Arc<RwLock<Clients>>,
        registration: Arc<RwLock<ServiceWorkerRegistration>>,
        notifications: Arc<RwLock<NotificationTray>>,
        events: mpsc::UnboundedSender<ServiceWorkerEvent>,
    ) -> Self {
        Self {
            worker_id,
            location,
            caches,
            fetcher,
            clients,
            registration,
            notifications,
            events,
            skip_waiting: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Resolve a possibly relative URL against the worker location.
    pub fn resolve(&self, url: &str) -> Result<Url> {
        self.location
            .join(url)
            .map_err(|e| ServiceWorkerError::NetworkError(format!("invalid URL '{url}': {e}")))
    }

    /// The network.
    pub fn fetcher(&self) -> &dyn Fetcher {
        self.fetcher.as_ref()
    }

    /// Shared handle to the network, for spawned tasks.
    pub fn fetcher_handle(&self) -> Arc<dyn Fetcher> {
        Arc::clone(&self.fetcher)
    }

    /// Ask the host to activate this worker without waiting for old pages
    /// to close.
    pub fn skip_waiting(&self) {
        debug!(worker = %self.worker_id, "skipWaiting requested");
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    /// Read and reset the skip-waiting request.
    pub(crate) fn take_skip_waiting(&self) -> bool {
        self.skip_waiting.swap(false, Ordering::SeqCst)
    }

    /// Scope URL of the registration.
    pub async fn scope_url(&self) -> Url {
        self.registration.read().await.scope.clone()
    }

    /// Take control of every page in scope not yet controlled by this
    /// worker. Returns how many pages were claimed.
    pub async fn claim_clients(&self) -> usize {
        let scope = self.scope_url().await;
        let claimed = self.clients.write().await.claim(&scope, self.worker_id);
        for client_id in &claimed {
            let _ = self.events.send(ServiceWorkerEvent::ControllerChange {
                client_id: client_id.clone(),
                worker_id: self.worker_id,
            });
        }
        info!(worker = %self.worker_id, claimed = claimed.len(), "Clients claimed");
        claimed.len()
    }

    /// Pages visible to this worker.
    pub async fn match_clients(&self, options: &ClientMatchOptions) -> Vec<Client> {
        let scope = self.scope_url().await;
        self.clients.read().await.match_all(&scope, self.worker_id, options)
    }

    /// Navigate (or, with the page's own URL, reload) a page.
    pub async fn navigate_client(&self, client_id: &str, url: Url) -> Result<Client> {
        self.clients.write().await.navigate(client_id, url)
    }

    /// Focus a page.
    pub async fn focus_client(&self, client_id: &str) -> Result<Client> {
        self.clients.write().await.focus(client_id)
    }

    /// Open a new window controlled by this worker.
    pub async fn open_window(&self, url: Url) -> Client {
        self.clients.write().await.open_window(url, Some(self.worker_id))
    }

    /// Remove the registration this worker belongs to.
    pub async fn unregister(&self) -> bool {
        let mut registration = self.registration.write().await;
        if registration.unregistered {
            return false;
        }
        registration.unregister();
        let _ = self.events.send(ServiceWorkerEvent::Unregistered {
            scope: registration.scope.to_string(),
        });
        info!(scope = %registration.scope, "Registration removed");
        true
    }

    /// Display a notification, replacing one with the same tag.
    pub async fn show_notification(&self, notification: Notification) {
        debug!(tag = %notification.tag, title = %notification.title, "Showing notification");
        self.notifications.write().await.show(notification);
    }

    /// Close the notification with `tag`.
    pub async fn close_notification(&self, tag: &str) -> bool {
        self.notifications.write().await.close(tag).is_some()
    }
}
