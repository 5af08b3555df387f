//! kvlock client - the retrying clerk.
//!
//! A [`Clerk`] turns an unreliable [`Transport`] into the store interface
//! used by locks and workloads. It retries every call until the server's
//! reply arrives. Gets are idempotent, so a retried get returns the
//! server's reply as is. A retried put is different: the earlier attempt may
//! have been applied, so the server's answer to the retry no longer tells
//! the caller what happened. Such puts report [`KvError::Maybe`].
//!
//! # Example
//!
//! ```
//! use kvlock_client::{Clerk, KvClerk};
//! use kvlock_server::KvServer;
//! use kvlock_transport::LocalTransport;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let transport = LocalTransport::new().with_server("kv", KvServer::new().into_server());
//! let clerk = Clerk::new(transport, "kv");
//! clerk.put("x", "v", 0).await.unwrap();
//! assert_eq!(clerk.get("x").await.unwrap().value, "v");
//! # }
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use kvlock_core::{
    GetArgs, GetReply, KvError, KvResult, PutArgs, PutReply, Version, VersionedValue, GET_METHOD,
    PUT_METHOD,
};
use kvlock_transport::{call_json, Transport, TransportError};

/// Default wait between retries of a failed call.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Store interface used by locks and workloads.
#[async_trait]
pub trait KvClerk: Send + Sync {
    /// Reads a key.
    async fn get(&self, key: &str) -> KvResult<VersionedValue>;

    /// Writes a key if its stored version equals `version`.
    async fn put(&self, key: &str, value: &str, version: Version) -> KvResult<()>;
}

#[async_trait]
impl<C: KvClerk + ?Sized> KvClerk for Arc<C> {
    async fn get(&self, key: &str) -> KvResult<VersionedValue> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, value: &str, version: Version) -> KvResult<()> {
        (**self).put(key, value, version).await
    }
}

/// Clerk that retries calls to one server until they get through.
#[derive(Debug)]
pub struct Clerk<T> {
    transport: T,
    server: String,
    retry_interval: Duration,
}

impl<T: Transport> Clerk<T> {
    /// Creates a clerk talking to `server` over `transport`.
    pub fn new(transport: T, server: impl Into<String>) -> Self {
        Self {
            transport,
            server: server.into(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Sets the wait between retries.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// The server this clerk talks to.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Handles a failed attempt: waits if it is worth retrying.
    ///
    /// # Panics
    ///
    /// Panics on a non-retryable transport error, which means the clerk is
    /// wired to the wrong server or service.
    async fn backoff(&self, method: &str, attempt: u32, err: TransportError) {
        if !err.is_retryable() {
            panic!("{} to {} failed: {}", method, self.server, err);
        }
        trace!(server = %self.server, method, attempt, error = %err, "retrying");
        tokio::time::sleep(self.retry_interval).await;
    }
}

#[async_trait]
impl<T: Transport> KvClerk for Clerk<T> {
    async fn get(&self, key: &str) -> KvResult<VersionedValue> {
        let args = GetArgs {
            key: key.to_string(),
        };
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call_json::<_, _, GetReply>(&self.transport, &self.server, GET_METHOD, &args)
                .await
            {
                Ok(reply) => return reply.into_result(),
                Err(err) => self.backoff(GET_METHOD, attempt, err).await,
            }
        }
    }

    async fn put(&self, key: &str, value: &str, version: Version) -> KvResult<()> {
        let args = PutArgs {
            key: key.to_string(),
            value: value.to_string(),
            version,
        };
        let mut attempt = 0;
        let mut has_failed = false;
        loop {
            attempt += 1;
            match call_json::<_, _, PutReply>(&self.transport, &self.server, PUT_METHOD, &args)
                .await
            {
                Ok(reply) => {
                    let result = reply.into_result();
                    if has_failed {
                        debug!(
                            key,
                            version,
                            attempts = attempt,
                            reply = kvlock_core::status_code(&result),
                            "put retried, reporting ErrMaybe"
                        );
                        return Err(KvError::Maybe);
                    }
                    return result;
                }
                Err(err) => {
                    has_failed = true;
                    self.backoff(PUT_METHOD, attempt, err).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvlock_server::KvServer;
    use kvlock_transport::LocalTransport;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, either before or after running them.
    struct Flaky {
        inner: LocalTransport,
        failures: AtomicU32,
        after_delivery: bool,
    }

    impl Flaky {
        fn new(failures: u32, after_delivery: bool) -> Self {
            Self {
                inner: LocalTransport::new().with_server("kv", KvServer::new().into_server()),
                failures: AtomicU32::new(failures),
                after_delivery,
            }
        }

        fn take_failure(&self) -> bool {
            self.failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl Transport for Flaky {
        async fn call(
            &self,
            server: &str,
            method: &str,
            args: &[u8],
        ) -> kvlock_transport::Result<Vec<u8>> {
            let fail = self.take_failure();
            if fail && !self.after_delivery {
                return Err(TransportError::Dropped);
            }
            let reply = self.inner.call(server, method, args).await;
            if fail {
                return Err(TransportError::Dropped);
            }
            reply
        }
    }

    fn clerk(transport: Flaky) -> Clerk<Flaky> {
        Clerk::new(transport, "kv").with_retry_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_put_without_retry_is_verbatim() {
        let ck = clerk(Flaky::new(0, false));
        assert_eq!(ck.put("x", "v", 0).await, Ok(()));
        assert_eq!(ck.put("x", "v", 0).await, Err(KvError::Version));
        assert_eq!(ck.put("y", "v", 1).await, Err(KvError::NoKey));
    }

    #[tokio::test]
    async fn test_lost_reply_reports_maybe() {
        let ck = clerk(Flaky::new(1, true));
        // First attempt applied, retry sees ErrVersion.
        assert_eq!(ck.put("x", "v", 0).await, Err(KvError::Maybe));
        assert_eq!(ck.get("x").await, Ok(VersionedValue::new("v", 1)));
    }

    #[tokio::test]
    async fn test_lost_request_reports_maybe() {
        let ck = clerk(Flaky::new(2, false));
        // Only the third attempt is applied, the outcome is still ambiguous.
        assert_eq!(ck.put("x", "v", 0).await, Err(KvError::Maybe));
        assert_eq!(ck.get("x").await, Ok(VersionedValue::new("v", 1)));
    }

    #[tokio::test]
    async fn test_get_retries_until_reply() {
        let ck = clerk(Flaky::new(3, true));
        assert_eq!(ck.get("missing").await, Err(KvError::NoKey));
    }

    #[tokio::test]
    #[should_panic(expected = "unknown service: KVServer")]
    async fn test_wiring_error_panics() {
        // The server exists but does not run the store service.
        let ck = Clerk::new(
            LocalTransport::new().with_server("kv", kvlock_transport::Server::new()),
            "kv",
        );
        let _ = ck.get("x").await;
    }
}
