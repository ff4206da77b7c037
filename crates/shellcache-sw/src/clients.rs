//! Open client contexts (pages) and which generation controls them.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use url::Url;

/// Unique identifier for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A client (controlled page).
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub url: Url,
    /// Generation currently controlling this client, if any.
    pub controller: Option<String>,
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<ClientId, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open page. It starts uncontrolled.
    pub fn open(&mut self, url: Url) -> ClientId {
        let id = ClientId::new();
        self.clients.insert(
            id,
            Client {
                id,
                url,
                controller: None,
            },
        );
        id
    }

    /// Get a client by ID.
    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    /// Remove a closed client.
    pub fn close(&mut self, id: ClientId) -> Option<Client> {
        self.clients.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Number of clients controlled by `generation`.
    pub fn controlled_by(&self, generation: &str) -> usize {
        self.clients
            .values()
            .filter(|c| c.controller.as_deref() == Some(generation))
            .count()
    }

    /// Make `generation` the controller of every client.
    ///
    /// Returns the clients whose controller changed, in id order.
    pub fn claim(&mut self, generation: &str) -> Vec<ClientId> {
        let mut changed: Vec<ClientId> = self
            .clients
            .values_mut()
            .filter(|c| c.controller.as_deref() != Some(generation))
            .map(|c| {
                c.controller = Some(generation.to_string());
                c.id
            })
            .collect();
        changed.sort_unstable();
        changed
    }
}
