//! # AgriMarket Offline Worker
//!
//! The background caching worker of the AgriMarket web application, together
//! with the small host model it needs to run outside a browser.
//!
//! ## Features
//!
//! - **Environment classification**: local/dev hosts get a self-removing
//!   pass-through worker, everything else gets the caching worker
//! - **Lifecycle**: install pre-caches the app shell, activate evicts old
//!   cache generations and claims open pages
//! - **Routing**: an ordered rule list maps each request to a strategy and a
//!   cache namespace
//! - **Strategies**: cache-first, network-first, stale-while-revalidate
//! - **Control channel**: `SKIP_WAITING`, `CACHE_URLS`, `CLEAR_CACHE`
//! - **Background sync and push notifications**
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer (host)
//!     │
//!     ├── ServiceWorkerRegistration (per scope)
//!     │       ├── installing / waiting / active (ServiceWorker)
//!     │       └── each ServiceWorker runs a WorkerBehavior
//!     │               ├── DevPassthroughWorker
//!     │               └── ProductionCachingWorker ── Router ── strategies
//!     │
//!     ├── SharedCacheStorage
//!     │       └── Cache (`<prefix>-<category>-<version>`)
//!     │               └── Request → CacheEntry
//!     ├── Clients (open pages)
//!     └── NotificationTray
//! ```

use agrimarket_common::AgriError;
use agrimarket_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod container;
pub mod environment;
pub mod lifetime;
pub mod message;
pub mod push;
pub mod registration;
pub mod router;
pub mod scope;
pub mod strategy;
pub mod sync;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache::{Cache, CacheEntry, CacheError, CacheStorage, SharedCacheStorage};
pub use clients::{Client, ClientMatchOptions, ClientType, Clients};
pub use config::{CacheCategory, CacheNames, WorkerConfig};
pub use container::{ContainerOptions, MessageTarget, RegistrationOptions, ServiceWorkerContainer, ServiceWorkerEvent};
pub use environment::Environment;
pub use lifetime::WaitUntil;
pub use message::ControlMessage;
pub use push::{Notification, NotificationTray, PushPayload};
pub use registration::{ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState};
pub use router::{BypassReason, RouteDecision, Router, Strategy};
pub use scope::WorkerScope;
pub use sync::{NoopSync, SyncHandler, SYNC_DATA_TAG};
pub use worker::{select_worker, DevPassthroughWorker, ProductionCachingWorker, WorkerBehavior};

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Sync failed: {0}")]
    SyncFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Common(#[from] AgriError),
}

impl From<NetError> for ServiceWorkerError {
    fn from(err: NetError) -> Self {
        ServiceWorkerError::NetworkError(err.to_string())
    }
}

/// Result type alias for worker operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;
