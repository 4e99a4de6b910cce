//! Clients API: the pages a worker controls.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use url::Url;

use crate::error::{SwError, SwResult};
use crate::lifecycle::WorkerId;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
}

/// A client (controlled page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Worker currently serving this client's requests.
    pub controller: Option<WorkerId>,
}

impl Client {
    /// A new, uncontrolled window client.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            focused: false,
            controller: None,
        }
    }
}

/// Clients registry.
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

    /// All clients, optionally only those controlled by `controller`.
    pub fn match_all(&self, controller: Option<WorkerId>) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| controller.is_none() || c.controller == controller)
            .collect()
    }

    /// First window client showing `url`.
    pub fn find_window(&self, url: &Url) -> Option<&Client> {
        self.clients
            .values()
            .find(|c| c.client_type == ClientType::Window && &c.url == url)
    }

    /// Open a window.
    pub fn open_window(&mut self, url: Url) -> Client {
        let mut client = Client::window(url);
        client.focused = true;
        self.unfocus_all();
        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    /// Focus a window client.
    pub fn focus(&mut self, id: &str) -> SwResult<()> {
        let is_window = match self.clients.get(id) {
            Some(client) => client.client_type == ClientType::Window,
            None => return Err(SwError::state(format!("no client {id}"))),
        };
        if !is_window {
            return Err(SwError::state("Can only focus window clients"));
        }

        self.unfocus_all();
        if let Some(client) = self.clients.get_mut(id) {
            client.focused = true;
        }
        Ok(())
    }

    /// Make `worker` the controller of every client. Returns the IDs that changed.
    pub fn claim(&mut self, worker: WorkerId) -> Vec<String> {
        self.clients
            .values_mut()
            .filter(|c| c.controller != Some(worker))
            .map(|c| {
                c.controller = Some(worker);
                c.id.clone()
            })
            .collect()
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn unfocus_all(&mut self) {
        for client in self.clients.values_mut() {
            client.focused = false;
        }
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!(
        "client-{:x}-{:04x}",
        offkit_common::unix_millis(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}
