//! RPC server: a registry of named services.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::error::{Result, TransportError};

/// A named RPC service.
///
/// The server strips the `Service.` prefix and hands the bare method name to
/// [`Service::handle`]. Arguments and replies are opaque encoded bytes.
#[async_trait]
pub trait Service: Send + Sync {
    /// Name under which the service is registered.
    fn name(&self) -> &str;

    /// Runs one method call.
    async fn handle(&self, method: &str, args: &[u8]) -> Result<Vec<u8>>;
}

/// A collection of services reachable under one server name.
pub struct Server {
    services: HashMap<String, Arc<dyn Service>>,
    count: AtomicU64,
}

impl Server {
    /// Creates a server with no services.
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
            count: AtomicU64::new(0),
        }
    }

    /// Registers a service, replacing any service with the same name.
    pub fn with_service(mut self, service: Arc<dyn Service>) -> Self {
        self.services.insert(service.name().to_string(), service);
        self
    }

    /// Routes `Service.Method` to the named service.
    pub async fn dispatch(&self, method: &str, args: &[u8]) -> Result<Vec<u8>> {
        self.count.fetch_add(1, Ordering::Relaxed);

        let (service_name, method_name) = method
            .split_once('.')
            .ok_or_else(|| TransportError::unknown_method(method))?;
        let service = self
            .services
            .get(service_name)
            .ok_or_else(|| TransportError::unknown_service(service_name))?;

        trace!(method, "dispatching");
        service.handle(method_name, args).await
    }

    /// Number of calls that reached this server.
    pub fn rpc_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .field("count", &self.rpc_count())
            .finish()
    }
}
