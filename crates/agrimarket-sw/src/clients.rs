//! Clients API: the pages a worker can see and control.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use url::Url;

use crate::registration::ServiceWorkerId;
use crate::ServiceWorkerError;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    All,
}

/// A client (open page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Current URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Worker controlling this page, if any.
    pub controller: Option<ServiceWorkerId>,

    /// How many times the page has been navigated or reloaded by a worker.
    pub navigation_count: u32,
}

impl Client {
    /// A visible, uncontrolled window at `url`.
    pub fn window(url: Url) -> Self {
        Self {
            id: format!("client-{}", uuid_simple()),
            url,
            client_type: ClientType::Window,
            focused: false,
            controller: None,
            navigation_count: 0,
        }
    }

    fn ensure_window(&self, action: &str) -> Result<(), ServiceWorkerError> {
        if self.client_type != ClientType::Window {
            return Err(ServiceWorkerError::StateError(format!(
                "Can only {action} window clients"
            )));
        }
        Ok(())
    }
}

/// Options for [`Clients::match_all`].
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    /// Also return pages not controlled by the asking worker.
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

impl ClientMatchOptions {
    /// Every window, controlled or not.
    pub fn all_windows() -> Self {
        Self {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        }
    }
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Clients visible to `worker`, in scope.
    pub fn match_all(&self, scope: &Url, worker: ServiceWorkerId, options: &ClientMatchOptions) -> Vec<Client> {
        let mut matched: Vec<Client> = self
            .clients
            .values()
            .filter(|c| c.url.as_str().starts_with(scope.as_str()))
            .filter(|c| options.include_uncontrolled || c.controller == Some(worker))
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    /// Make `worker` the controller of every client in scope it does not
    /// already control. Returns the ids of the newly claimed clients.
    pub fn claim(&mut self, scope: &Url, worker: ServiceWorkerId) -> Vec<String> {
        let mut claimed: Vec<String> = self
            .clients
            .values_mut()
            .filter(|c| c.url.as_str().starts_with(scope.as_str()))
            .filter(|c| c.controller != Some(worker))
            .map(|c| {
                c.controller = Some(worker);
                c.id.clone()
            })
            .collect();
        claimed.sort();
        claimed
    }

    /// Open a window controlled by `controller`.
    pub fn open_window(&mut self, url: Url, controller: Option<ServiceWorkerId>) -> Client {
        for client in self.clients.values_mut() {
            client.focused = false;
        }
        let mut client = Client::window(url);
        client.focused = true;
        client.controller = controller;
        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    /// Focus a window client.
    pub fn focus(&mut self, id: &str) -> Result<Client, ServiceWorkerError> {
        self.get(id)
            .ok_or_else(|| ServiceWorkerError::NotFound(id.to_string()))?
            .ensure_window("focus")?;

        for client in self.clients.values_mut() {
            client.focused = client.id == id;
        }
        self.get(id)
            .cloned()
            .ok_or_else(|| ServiceWorkerError::NotFound(id.to_string()))
    }

    /// Navigate a window client. The page is reloaded from scratch, so it
    /// loses its controller.
    pub fn navigate(&mut self, id: &str, url: Url) -> Result<Client, ServiceWorkerError> {
        let client = self
            .clients
            .get_mut(id)
            .ok_or_else(|| ServiceWorkerError::NotFound(id.to_string()))?;
        client.ensure_window("navigate")?;

        client.url = url;
        client.controller = None;
        client.navigation_count += 1;
        Ok(client.clone())
    }
}

/// Generate a simple unique id.
fn uuid_simple() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!(
        "{:016x}-{:04x}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}
