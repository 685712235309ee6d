//! Service worker instances and registrations.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::worker::WorkerBehavior;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Script evaluated, not yet installing.
    #[default]
    Parsed,
    /// Install event running.
    Installing,
    /// Installed and waiting for activation.
    Installed,
    /// Activate event running.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced, unregistered, or failed to install.
    Redundant,
}

/// A service worker instance.
#[derive(Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Script URL.
    pub script_url: Url,

    /// Version token of the generation this worker runs.
    pub version: String,

    /// Current state.
    pub state: ServiceWorkerState,

    /// Event handlers.
    pub behavior: Arc<dyn WorkerBehavior>,
}

impl fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("id", &self.id)
            .field("script_url", &self.script_url.as_str())
            .field("version", &self.version)
            .field("state", &self.state)
            .field("behavior", &self.behavior.name())
            .finish()
    }
}

impl ServiceWorker {
    /// Create a new service worker.
    pub fn new(script_url: Url, behavior: Arc<dyn WorkerBehavior>) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            script_url,
            version: behavior.version().to_string(),
            state: ServiceWorkerState::Parsed,
            behavior,
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }
}

/// A service worker registration.
#[derive(Debug, Clone)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,

    /// Set once the registration has been removed.
    pub unregistered: bool,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
            unregistered: false,
        }
    }

    /// The active worker, if it finished activating.
    pub fn controller(&self) -> Option<&ServiceWorker> {
        self.active.as_ref().filter(|w| w.is_active())
    }

    /// Start installing a new worker. A previous installing worker is
    /// discarded.
    pub fn update(&mut self, mut worker: ServiceWorker) {
        if let Some(mut previous) = self.installing.take() {
            previous.set_state(ServiceWorkerState::Redundant);
        }
        worker.set_state(ServiceWorkerState::Installing);
        self.installing = Some(worker);
        self.unregistered = false;
    }

    /// Transition installing to waiting. A worker already waiting is
    /// replaced.
    pub fn install_complete(&mut self) {
        if let Some(mut worker) = self.installing.take() {
            worker.set_state(ServiceWorkerState::Installed);
            if let Some(mut replaced) = self.waiting.replace(worker) {
                replaced.set_state(ServiceWorkerState::Redundant);
            }
        }
    }

    /// Drop the installing worker after its install step failed.
    pub fn install_failed(&mut self) -> Option<ServiceWorker> {
        self.installing.take().map(|mut worker| {
            worker.set_state(ServiceWorkerState::Redundant);
            worker
        })
    }

    /// Promote the waiting worker to active (state `Activating`) and retire
    /// the previous active worker. Returns the activating worker.
    pub fn activate(&mut self) -> Option<ServiceWorker> {
        let mut worker = self.waiting.take()?;
        worker.set_state(ServiceWorkerState::Activating);

        if let Some(mut old) = self.active.take() {
            old.set_state(ServiceWorkerState::Redundant);
        }

        self.active = Some(worker.clone());
        Some(worker)
    }

    /// Finish activation. Returns `false` when the worker is no longer the
    /// active one (for example because it unregistered itself).
    pub fn activation_complete(&mut self, id: ServiceWorkerId) -> bool {
        match self.active.as_mut() {
            Some(worker) if worker.id == id && !self.unregistered => {
                worker.set_state(ServiceWorkerState::Activated);
                true
            }
            _ => false,
        }
    }

    /// Find a worker of this registration by id.
    pub fn worker(&self, id: ServiceWorkerId) -> Option<&ServiceWorker> {
        [&self.installing, &self.waiting, &self.active]
            .into_iter()
            .flatten()
            .find(|w| w.id == id)
    }

    /// Unregister: every worker becomes redundant.
    pub fn unregister(&mut self) {
        for slot in [&mut self.active, &mut self.waiting, &mut self.installing] {
            if let Some(mut worker) = slot.take() {
                worker.set_state(ServiceWorkerState::Redundant);
            }
        }
        self.unregistered = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::DevPassthroughWorker;

    fn worker(version: &str) -> ServiceWorker {
        let url = Url::parse("https://market.example/sw.js").unwrap();
        ServiceWorker::new(url, Arc::new(DevPassthroughWorker::new(version)))
    }

    fn registration() -> ServiceWorkerRegistration {
        ServiceWorkerRegistration::new(Url::parse("https://market.example/").unwrap())
    }

    #[test]
    fn test_service_worker_creation() {
        let worker = worker("v1");
        assert_eq!(worker.state, ServiceWorkerState::Parsed);
        assert_eq!(worker.version, "v1");
        assert!(!worker.is_active());
    }

    #[test]
    fn test_registration_lifecycle() {
        let mut registration = registration();

        registration.update(worker("v1"));
        assert_eq!(
            registration.installing.as_ref().map(|w| w.state),
            Some(ServiceWorkerState::Installing)
        );

        registration.install_complete();
        assert!(registration.installing.is_none());
        assert_eq!(
            registration.waiting.as_ref().map(|w| w.state),
            Some(ServiceWorkerState::Installed)
        );

        let activating = registration.activate().unwrap();
        assert_eq!(activating.state, ServiceWorkerState::Activating);
        assert!(registration.controller().is_none());

        assert!(registration.activation_complete(activating.id));
        assert_eq!(registration.controller().map(|w| w.id), Some(activating.id));
    }

    #[test]
    fn test_activation_replaces_previous_worker() {
        let mut registration = registration();
        registration.update(worker("v1"));
        registration.install_complete();
        let first = registration.activate().unwrap();
        registration.activation_complete(first.id);

        registration.update(worker("v2"));
        registration.install_complete();
        let second = registration.activate().unwrap();
        registration.activation_complete(second.id);

        assert_eq!(registration.controller().map(|w| w.version.as_str()), Some("v2"));
        assert!(registration.worker(first.id).is_none());
    }

    #[test]
    fn test_install_failed_discards_worker() {
        let mut registration = registration();
        registration.update(worker("v1"));

        let failed = registration.install_failed().unwrap();
        assert!(failed.is_redundant());
        assert!(registration.installing.is_none());
        assert!(registration.waiting.is_none());
    }

    #[test]
    fn test_unregister_during_activation() {
        let mut registration = registration();
        registration.update(worker("v1"));
        registration.install_complete();
        let activating = registration.activate().unwrap();

        registration.unregister();
        assert!(!registration.activation_complete(activating.id));
        assert!(registration.unregistered);
        assert!(registration.controller().is_none());
    }
}
