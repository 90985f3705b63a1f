//! Registry of open page instances and the agent → page channel.
//!
//! Each connected client gets its own unbounded mpsc inbox. Delivery is
//! best-effort: a client whose inbox has been dropped is skipped and pruned,
//! never retried.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use url::Url;

use crate::cache::CacheVersion;
use crate::message::AgentMessage;

/// Identifier of one open page instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Page-side end of a connection.
#[derive(Debug)]
pub struct ClientHandle {
    pub id: ClientId,
    pub inbox: mpsc::UnboundedReceiver<AgentMessage>,
}

/// Snapshot of a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    pub id: ClientId,
    pub url: Url,
    /// Version controlling this client, if any.
    pub controller: Option<CacheVersion>,
}

#[derive(Debug)]
struct Connected {
    url: Url,
    controller: Option<CacheVersion>,
    sender: mpsc::UnboundedSender<AgentMessage>,
}

/// Shared client registry. Cloning shares the same registry.
#[derive(Debug, Clone, Default)]
pub struct Messenger {
    clients: Arc<RwLock<HashMap<ClientId, Connected>>>,
    next_id: Arc<AtomicU64>,
}

impl Messenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly loaded page.
    pub async fn connect(&self, url: Url, controller: Option<CacheVersion>) -> ClientHandle {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (sender, inbox) = mpsc::unbounded_channel();

        self.clients.write().await.insert(id, Connected { url, controller, sender });
        tracing::debug!(client = %id, "client connected");

        ClientHandle { id, inbox }
    }

    /// Forget a closed page. Returns false if it was not connected.
    pub async fn disconnect(&self, id: ClientId) -> bool {
        let removed = self.clients.write().await.remove(&id).is_some();
        if removed {
            tracing::debug!(client = %id, "client disconnected");
        }
        removed
    }

    /// Put every reachable client under `version`.
    ///
    /// Clients whose inbox is gone are skipped and pruned. Returns the claimed ids.
    pub async fn claim(&self, version: CacheVersion) -> Vec<ClientId> {
        let mut clients = self.clients.write().await;
        let mut claimed = Vec::with_capacity(clients.len());

        clients.retain(|id, client| {
            if client.sender.is_closed() {
                tracing::warn!(client = %id, %version, "skipping unreachable client during claim");
                return false;
            }
            client.controller = Some(version);
            claimed.push(*id);
            true
        });

        claimed.sort();
        claimed
    }

    /// Send `message` to one client. Returns false if it could not be delivered.
    pub async fn post(&self, id: ClientId, message: AgentMessage) -> bool {
        let clients = self.clients.read().await;
        match clients.get(&id) {
            Some(client) => client.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Send `message` to every given client; returns how many accepted it.
    pub async fn notify(&self, ids: &[ClientId], message: &AgentMessage) -> usize {
        let clients = self.clients.read().await;
        let mut delivered = 0;
        for id in ids {
            match clients.get(id) {
                Some(client) if client.sender.send(message.clone()).is_ok() => delivered += 1,
                _ => tracing::debug!(client = %id, "message dropped"),
            }
        }
        delivered
    }

    /// Send `message` to every connected client.
    pub async fn broadcast(&self, message: &AgentMessage) -> usize {
        let ids: Vec<ClientId> = self.clients.read().await.keys().copied().collect();
        self.notify(&ids, message).await
    }

    /// Connected clients ordered by id.
    pub async fn clients(&self) -> Vec<ClientInfo> {
        let clients = self.clients.read().await;
        let mut infos: Vec<ClientInfo> = clients
            .iter()
            .map(|(id, c)| ClientInfo { id: *id, url: c.url.clone(), controller: c.controller })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}
