//! kvlock transport - the RPC boundary between clerks and the store.
//!
//! The [`Transport`] trait is the whole contract a clerk relies on: a call
//! either runs the named method exactly once and returns its reply, or fails.
//! A [`TransportError::Dropped`] failure is ambiguous: the method may or may
//! not have run.
//!
//! # Modules
//!
//! - [`network`]: a simulated lossy network with seedable faults
//! - [`server`]: the [`Service`] trait and the [`Server`] dispatcher
//! - [`clients`]: per-clerk end point registry ([`Clients`], [`Client`])
//! - [`error`]: transport error types
//!
//! # Example
//!
//! ```
//! use kvlock_transport::{Clients, Network, NetworkConfig, Server};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let net = Network::new(NetworkConfig::default().with_reliable(false).with_seed(1));
//! net.add_server("server-0-0", Server::new()).await;
//! let clients = Clients::new(net.clone());
//! let client = clients.make_client().await;
//! # let _ = client;
//! clients.cleanup().await;
//! # }
//! ```

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub mod clients;
pub mod error;
pub mod network;
pub mod server;

pub use clients::{server_name, Client, Clients};
pub use error::{Result, TransportError};
pub use network::{ClientEnd, Network, NetworkConfig};
pub use server::{Server, Service};

/// A way of calling methods on named servers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Calls `method` (`Service.Method`) on `server` with encoded arguments.
    async fn call(&self, server: &str, method: &str, args: &[u8]) -> Result<Vec<u8>>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn call(&self, server: &str, method: &str, args: &[u8]) -> Result<Vec<u8>> {
        (**self).call(server, method, args).await
    }
}

/// Calls a method with JSON-encoded arguments and decodes the JSON reply.
pub async fn call_json<T, A, R>(transport: &T, server: &str, method: &str, args: &A) -> Result<R>
where
    T: Transport + ?Sized,
    A: Serialize + Sync,
    R: DeserializeOwned,
{
    let bytes = serde_json::to_vec(args)?;
    let reply = transport.call(server, method, &bytes).await?;
    Ok(serde_json::from_slice(&reply)?)
}

/// A lossless in-process transport that calls servers directly.
///
/// Calls to a name with no registered server fail with
/// [`TransportError::UnknownServer`].
#[derive(Debug, Default)]
pub struct LocalTransport {
    servers: HashMap<String, Arc<Server>>,
}

impl LocalTransport {
    /// Creates a transport with no servers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a server under a name.
    pub fn with_server(mut self, name: impl Into<String>, server: Server) -> Self {
        self.servers.insert(name.into(), Arc::new(server));
        self
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn call(&self, server: &str, method: &str, args: &[u8]) -> Result<Vec<u8>> {
        let target = self
            .servers
            .get(server)
            .ok_or_else(|| TransportError::unknown_server(server))?;
        target.dispatch(method, args).await
    }
}
