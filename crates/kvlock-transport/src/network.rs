//! Simulated lossy RPC network.
//!
//! A [`Network`] owns a set of named servers and a set of named client end
//! points. Each end is connected to at most one server and can be enabled or
//! disabled at runtime. Calls through an end are subject to the network's
//! fault model:
//!
//! - **reliable**: the call reaches the server and the reply comes back.
//! - **unreliable**: a short random delay, then the request may be dropped
//!   before it reaches the server, or the reply may be dropped after the
//!   handler ran.
//! - **long reordering**: a delivered reply may be held back for a long time,
//!   so replies arrive out of order.
//! - **disabled end or missing server**: the caller waits for a simulated
//!   timeout and gets [`TransportError::Dropped`]. With **long delays** the
//!   timeout can be several seconds.
//!
//! All randomness comes from one seedable [`ChaCha8Rng`].

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::server::Server;

/// Fault model of a [`Network`].
///
/// # Example
///
/// ```
/// use kvlock_transport::NetworkConfig;
///
/// let config = NetworkConfig::default()
///     .with_reliable(false)
///     .with_drop_request_per_mille(50)
///     .with_seed(7);
/// assert_eq!(config.drop_reply_per_mille, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Deliver every call when true.
    pub reliable: bool,
    /// Chance, out of 1000, that an unreliable request never reaches the server.
    pub drop_request_per_mille: u32,
    /// Chance, out of 1000, that an unreliable reply is discarded.
    pub drop_reply_per_mille: u32,
    /// Upper bound of the delay before an unreliable request is delivered.
    pub max_short_delay_ms: u64,
    /// Simulated timeouts of disabled ends last up to seven seconds.
    pub long_delays: bool,
    /// Delivered replies may be delayed by 200 to 2200 ms.
    pub long_reordering: bool,
    /// Seed for the fault RNG. A random seed is used when unset.
    pub seed: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            reliable: true,
            drop_request_per_mille: 100,
            drop_reply_per_mille: 100,
            max_short_delay_ms: 27,
            long_delays: false,
            long_reordering: false,
            seed: None,
        }
    }
}

impl NetworkConfig {
    /// Sets whether calls are always delivered.
    pub fn with_reliable(mut self, reliable: bool) -> Self {
        self.reliable = reliable;
        self
    }

    /// Sets the request drop chance, clamped to 1000.
    pub fn with_drop_request_per_mille(mut self, per_mille: u32) -> Self {
        self.drop_request_per_mille = per_mille.min(1000);
        self
    }

    /// Sets the reply drop chance, clamped to 1000.
    pub fn with_drop_reply_per_mille(mut self, per_mille: u32) -> Self {
        self.drop_reply_per_mille = per_mille.min(1000);
        self
    }

    /// Sets the maximum short delay in milliseconds.
    pub fn with_max_short_delay_ms(mut self, ms: u64) -> Self {
        self.max_short_delay_ms = ms;
        self
    }

    /// Enables or disables long simulated timeouts.
    pub fn with_long_delays(mut self, enabled: bool) -> Self {
        self.long_delays = enabled;
        self
    }

    /// Enables or disables long reply reordering.
    pub fn with_long_reordering(mut self, enabled: bool) -> Self {
        self.long_reordering = enabled;
        self
    }

    /// Fixes the fault RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[derive(Debug, Default)]
struct EndState {
    server: Option<String>,
    enabled: bool,
}

#[derive(Debug, Default)]
struct Topology {
    ends: HashMap<String, EndState>,
    servers: HashMap<String, Arc<Server>>,
}

#[derive(Debug)]
struct Inner {
    config: Mutex<NetworkConfig>,
    topology: Mutex<Topology>,
    rng: Mutex<ChaCha8Rng>,
    rpc_total: AtomicU64,
}

/// Outcome of resolving an end for one call.
enum Route {
    Deliver {
        server: Arc<Server>,
        config: NetworkConfig,
    },
    Timeout {
        long_delays: bool,
    },
}

/// Handle to a simulated network. Clones share the same network.
#[derive(Debug, Clone)]
pub struct Network {
    inner: Arc<Inner>,
}

impl Network {
    /// Creates an empty network with the given fault model.
    pub fn new(config: NetworkConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::seed_from_u64(rand::random()),
        };
        Self {
            inner: Arc::new(Inner {
                config: Mutex::new(config),
                topology: Mutex::new(Topology::default()),
                rng: Mutex::new(rng),
                rpc_total: AtomicU64::new(0),
            }),
        }
    }

    /// Creates an empty reliable network.
    pub fn reliable() -> Self {
        Self::new(NetworkConfig::default())
    }

    /// Switches between reliable and unreliable delivery.
    pub async fn set_reliable(&self, reliable: bool) {
        self.inner.config.lock().await.reliable = reliable;
    }

    /// Returns whether delivery is currently reliable.
    pub async fn is_reliable(&self) -> bool {
        self.inner.config.lock().await.reliable
    }

    /// A snapshot of the current fault model.
    pub async fn config(&self) -> NetworkConfig {
        self.inner.config.lock().await.clone()
    }

    /// Enables or disables long simulated timeouts.
    pub async fn set_long_delays(&self, enabled: bool) {
        self.inner.config.lock().await.long_delays = enabled;
    }

    /// Enables or disables long reply reordering.
    pub async fn set_long_reordering(&self, enabled: bool) {
        self.inner.config.lock().await.long_reordering = enabled;
    }

    /// Creates a disconnected, disabled end point.
    ///
    /// Creating an end that already exists resets it.
    pub async fn make_end(&self, name: impl Into<String>) -> ClientEnd {
        let name = name.into();
        self.inner
            .topology
            .lock()
            .await
            .ends
            .insert(name.clone(), EndState::default());
        ClientEnd {
            name,
            network: self.clone(),
        }
    }

    /// Connects an end to a server name. The server need not exist yet.
    pub async fn connect(&self, end: &str, server: impl Into<String>) {
        if let Some(state) = self.inner.topology.lock().await.ends.get_mut(end) {
            state.server = Some(server.into());
        }
    }

    /// Enables or disables an end.
    pub async fn enable(&self, end: &str, enabled: bool) {
        if let Some(state) = self.inner.topology.lock().await.ends.get_mut(end) {
            state.enabled = enabled;
        }
    }

    /// Removes an end. Later calls through it time out.
    pub async fn delete_end(&self, end: &str) {
        self.inner.topology.lock().await.ends.remove(end);
    }

    /// Registers a server under a name, replacing any previous one.
    pub async fn add_server(&self, name: impl Into<String>, server: Server) {
        let name = name.into();
        debug!(server = %name, "adding server");
        self.inner
            .topology
            .lock()
            .await
            .servers
            .insert(name, Arc::new(server));
    }

    /// Removes a server. Replies of calls in flight on it are dropped.
    pub async fn delete_server(&self, name: &str) {
        debug!(server = %name, "deleting server");
        self.inner.topology.lock().await.servers.remove(name);
    }

    /// Number of calls that reached the named server.
    pub async fn server_rpc_count(&self, name: &str) -> u64 {
        self.inner
            .topology
            .lock()
            .await
            .servers
            .get(name)
            .map_or(0, |s| s.rpc_count())
    }

    /// Total number of call attempts made through any end.
    pub fn rpc_total(&self) -> u64 {
        self.inner.rpc_total.load(Ordering::Relaxed)
    }

    /// Drops every server and end.
    pub async fn cleanup(&self) {
        let mut topology = self.inner.topology.lock().await;
        topology.ends.clear();
        topology.servers.clear();
    }

    async fn route(&self, end: &str) -> Route {
        let config = self.inner.config.lock().await.clone();
        let topology = self.inner.topology.lock().await;
        let server = topology
            .ends
            .get(end)
            .filter(|state| state.enabled)
            .and_then(|state| state.server.as_ref())
            .and_then(|name| topology.servers.get(name))
            .cloned();

        match server {
            Some(server) => Route::Deliver { server, config },
            None => Route::Timeout {
                long_delays: config.long_delays,
            },
        }
    }

    async fn still_registered(&self, server: &Arc<Server>) -> bool {
        self.inner
            .topology
            .lock()
            .await
            .servers
            .values()
            .any(|s| Arc::ptr_eq(s, server))
    }

    async fn random_below(&self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        self.inner.rng.lock().await.gen_range(0..bound)
    }

    async fn chance(&self, per_mille: u32) -> bool {
        self.random_below(1000).await < u64::from(per_mille)
    }

    async fn call_end(&self, end: &str, method: &str, args: &[u8]) -> Result<Vec<u8>> {
        self.inner.rpc_total.fetch_add(1, Ordering::Relaxed);

        let (server, config) = match self.route(end).await {
            Route::Deliver { server, config } => (server, config),
            Route::Timeout { long_delays } => {
                let bound = if long_delays { 7000 } else { 100 };
                let ms = self.random_below(bound).await;
                trace!(end, method, ms, "end unreachable, timing out");
                tokio::time::sleep(Duration::from_millis(ms)).await;
                return Err(TransportError::Dropped);
            }
        };

        if !config.reliable {
            let ms = self.random_below(config.max_short_delay_ms + 1).await;
            tokio::time::sleep(Duration::from_millis(ms)).await;
            if self.chance(config.drop_request_per_mille).await {
                trace!(end, method, "request dropped");
                return Err(TransportError::Dropped);
            }
        }

        let reply = server.dispatch(method, args).await?;

        if !self.still_registered(&server).await {
            trace!(end, method, "server deleted during call, reply dropped");
            return Err(TransportError::Dropped);
        }

        if !config.reliable && self.chance(config.drop_reply_per_mille).await {
            trace!(end, method, "reply dropped");
            return Err(TransportError::Dropped);
        }

        if config.long_reordering && self.random_below(900).await < 600 {
            let spread = self.random_below(2000).await;
            let ms = 200 + self.random_below(1 + spread).await;
            trace!(end, method, ms, "reply reordered");
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        Ok(reply)
    }
}

/// A named end point on a [`Network`].
#[derive(Debug, Clone)]
pub struct ClientEnd {
    name: String,
    network: Network,
}

impl ClientEnd {
    /// Name of this end.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Calls a method on whatever server this end is connected to.
    pub async fn call(&self, method: &str, args: &[u8]) -> Result<Vec<u8>> {
        self.network.call_end(&self.name, method, args).await
    }
}
