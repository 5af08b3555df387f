//! Per-clerk end point bookkeeping.
//!
//! A [`Client`] stands for one clerk's view of the network: it owns one
//! [`ClientEnd`] per server it talks to, created lazily on first use. A
//! client made with [`Clients::make_client_to`] can only reach the listed
//! servers; ends to every other server are created disabled.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::network::{ClientEnd, Network};
use crate::Transport;

/// Returns the conventional name of server `i` in group `gid`.
///
/// # Example
///
/// ```
/// assert_eq!(kvlock_transport::server_name(0, 1), "server-0-1");
/// ```
pub fn server_name(gid: u32, i: usize) -> String {
    format!("server-{}-{}", gid, i)
}

/// One clerk's set of end points.
#[derive(Debug)]
pub struct Client {
    id: u64,
    network: Network,
    allowed: Mutex<Option<HashSet<String>>>,
    ends: Mutex<HashMap<String, ClientEnd>>,
}

impl Client {
    /// Identifier of this client within its registry.
    pub fn id(&self) -> u64 {
        self.id
    }

    fn end_name(&self, server: &str) -> String {
        format!("client-{}-{}", self.id, server)
    }

    async fn may_reach(&self, server: &str) -> bool {
        self.allowed
            .lock()
            .await
            .as_ref()
            .map_or(true, |allowed| allowed.contains(server))
    }

    async fn end_for(&self, server: &str) -> ClientEnd {
        let mut ends = self.ends.lock().await;
        if let Some(end) = ends.get(server) {
            return end.clone();
        }

        let name = self.end_name(server);
        let end = self.network.make_end(name.clone()).await;
        self.network.connect(&name, server).await;
        let enabled = self.may_reach(server).await;
        self.network.enable(&name, enabled).await;
        ends.insert(server.to_string(), end.clone());
        end
    }

    /// Restricts this client to the given servers and updates existing ends.
    pub async fn connect_to(&self, servers: &[String]) {
        let allowed: HashSet<String> = servers.iter().cloned().collect();
        for (server, end) in self.ends.lock().await.iter() {
            self.network
                .enable(end.name(), allowed.contains(server))
                .await;
        }
        *self.allowed.lock().await = Some(allowed);
    }

    /// Cuts this client off from every server.
    pub async fn disconnect_all(&self) {
        self.connect_to(&[]).await;
    }

    // The ends stay cached so that later calls resolve to a missing end.
    async fn delete_ends(&self) {
        for end in self.ends.lock().await.values() {
            self.network.delete_end(end.name()).await;
        }
    }
}

#[async_trait]
impl Transport for Client {
    async fn call(&self, server: &str, method: &str, args: &[u8]) -> Result<Vec<u8>> {
        self.end_for(server).await.call(method, args).await
    }
}

/// Registry of the clients made on one network.
#[derive(Debug)]
pub struct Clients {
    network: Network,
    next_id: AtomicU64,
    clients: Mutex<HashMap<u64, Arc<Client>>>,
}

impl Clients {
    /// Creates an empty registry on a network.
    pub fn new(network: Network) -> Self {
        Self {
            network,
            next_id: AtomicU64::new(0),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The network clients are made on.
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Makes a client that can reach every server.
    pub async fn make_client(&self) -> Arc<Client> {
        self.register(None).await
    }

    /// Makes a client that can reach only the given servers.
    pub async fn make_client_to(&self, servers: &[String]) -> Arc<Client> {
        self.register(Some(servers.iter().cloned().collect())).await
    }

    async fn register(&self, allowed: Option<HashSet<String>>) -> Arc<Client> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let client = Arc::new(Client {
            id,
            network: self.network.clone(),
            allowed: Mutex::new(allowed),
            ends: Mutex::new(HashMap::new()),
        });
        self.clients.lock().await.insert(id, client.clone());
        debug!(client = id, "made client");
        client
    }

    /// Deletes a client's ends. Later calls through it time out.
    pub async fn delete_client(&self, client: &Client) {
        self.clients.lock().await.remove(&client.id);
        client.delete_ends().await;
        debug!(client = client.id, "deleted client");
    }

    /// Number of live clients.
    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Returns true if no client is live.
    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }

    /// Deletes every client.
    pub async fn cleanup(&self) {
        let clients: Vec<_> = self.clients.lock().await.drain().map(|(_, c)| c).collect();
        for client in clients {
            client.delete_ends().await;
        }
    }
}
