//! RPC service wrapping the store.

use async_trait::async_trait;
use std::sync::Arc;

use kvlock_core::{GetArgs, GetReply, PutArgs, PutReply, SERVICE_NAME};
use kvlock_transport::{Result, Server, Service, TransportError};

use crate::store::KeyValueStore;

/// The `KVServer` service: `Get` and `Put` over JSON.
#[derive(Debug, Clone)]
pub struct KvServer {
    store: Arc<KeyValueStore>,
}

impl KvServer {
    /// Creates a service over a fresh store.
    pub fn new() -> Self {
        Self::with_store(Arc::new(KeyValueStore::new()))
    }

    /// Creates a service over an existing store.
    pub fn with_store(store: Arc<KeyValueStore>) -> Self {
        Self { store }
    }

    /// The store behind this service.
    pub fn store(&self) -> &Arc<KeyValueStore> {
        &self.store
    }

    /// Wraps this service in a [`Server`] ready to add to a network.
    pub fn into_server(self) -> Server {
        Server::new().with_service(Arc::new(self))
    }

    async fn get(&self, args: GetArgs) -> GetReply {
        self.store.get(&args.key).await.into()
    }

    async fn put(&self, args: PutArgs) -> PutReply {
        self.store
            .put(args.key, args.value, args.version)
            .await
            .into()
    }
}

impl Default for KvServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Service for KvServer {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn handle(&self, method: &str, args: &[u8]) -> Result<Vec<u8>> {
        match method {
            "Get" => {
                let args: GetArgs = serde_json::from_slice(args)?;
                Ok(serde_json::to_vec(&self.get(args).await)?)
            }
            "Put" => {
                let args: PutArgs = serde_json::from_slice(args)?;
                Ok(serde_json::to_vec(&self.put(args).await)?)
            }
            other => Err(TransportError::unknown_method(format!(
                "{}.{}",
                SERVICE_NAME, other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvlock_core::{KvError, VersionedValue, GET_METHOD, PUT_METHOD};
    use kvlock_transport::{call_json, LocalTransport};

    fn transport() -> LocalTransport {
        LocalTransport::new().with_server("kv", KvServer::new().into_server())
    }

    #[tokio::test]
    async fn test_get_put_over_rpc() {
        let t = transport();
        let put = PutArgs {
            key: "x".into(),
            value: "v".into(),
            version: 0,
        };
        let reply: PutReply = call_json(&t, "kv", PUT_METHOD, &put).await.unwrap();
        assert_eq!(reply.into_result(), Ok(()));

        let reply: GetReply = call_json(&t, "kv", GET_METHOD, &GetArgs { key: "x".into() })
            .await
            .unwrap();
        assert_eq!(reply.into_result(), Ok(VersionedValue::new("v", 1)));

        let reply: GetReply = call_json(&t, "kv", GET_METHOD, &GetArgs { key: "y".into() })
            .await
            .unwrap();
        assert_eq!(reply.into_result(), Err(KvError::NoKey));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let t = transport();
        let result: Result<PutReply> =
            call_json(&t, "kv", "KVServer.Append", &GetArgs { key: "x".into() }).await;
        assert_eq!(
            result.unwrap_err(),
            TransportError::unknown_method("KVServer.Append")
        );
    }
}
