//! Clerk wrapper that records every call in the operation log.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kvlock_client::KvClerk;
use kvlock_core::{ClientId, KvInput, KvOutput, KvResult, OpLog, Version, VersionedValue};

/// Counts operations issued by every clerk of a test.
pub type OpCounter = Arc<AtomicU64>;

/// Wraps a clerk, timestamping each call at issue and return and appending
/// it to a shared [`OpLog`] under this clerk's client id.
#[derive(Debug)]
pub struct LoggedClerk<C> {
    inner: C,
    client: ClientId,
    log: Arc<OpLog>,
    ops: OpCounter,
}

impl<C: KvClerk> LoggedClerk<C> {
    /// Wraps `inner`, logging under `client`.
    pub fn new(inner: C, client: ClientId, log: Arc<OpLog>, ops: OpCounter) -> Self {
        Self {
            inner,
            client,
            log,
            ops,
        }
    }

    /// The client id operations are logged under.
    pub fn client(&self) -> ClientId {
        self.client
    }

    /// The wrapped clerk.
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: KvClerk> KvClerk for LoggedClerk<C> {
    async fn get(&self, key: &str) -> KvResult<VersionedValue> {
        let call = self.log.timestamp();
        let result = self.inner.get(key).await;
        let ret = self.log.timestamp();
        self.ops.fetch_add(1, Ordering::Relaxed);
        self.log
            .append(
                self.client,
                KvInput::get(key),
                KvOutput::Get(result.clone()),
                call,
                ret,
            )
            .await;
        result
    }

    async fn put(&self, key: &str, value: &str, version: Version) -> KvResult<()> {
        let call = self.log.timestamp();
        let result = self.inner.put(key, value, version).await;
        let ret = self.log.timestamp();
        self.ops.fetch_add(1, Ordering::Relaxed);
        self.log
            .append(
                self.client,
                KvInput::put(key, value, version),
                KvOutput::Put(result),
                call,
                ret,
            )
            .await;
        result
    }
}
