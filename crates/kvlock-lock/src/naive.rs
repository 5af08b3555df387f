//! Lock with an anonymous held marker.

use async_trait::async_trait;
use tracing::{debug, trace};

use kvlock_client::KvClerk;
use kvlock_core::KvError;

use crate::error::{LockError, Result};
use crate::{LockConfig, Locker, FREE, HELD};

/// A lock that writes [`HELD`] without any owner identity.
///
/// If an acquiring put comes back `ErrMaybe` after it was applied, this lock
/// sees its own marker as somebody else's and waits forever. If a releasing
/// put is lost and retried, the lock can be freed twice. Use it only over a
/// reliable transport; [`RobustLock`](crate::RobustLock) handles ambiguity.
#[derive(Debug)]
pub struct NaiveLock<C> {
    clerk: C,
    key: String,
    config: LockConfig,
}

impl<C: KvClerk> NaiveLock<C> {
    /// Creates a lock on `key` that talks to the store through `clerk`.
    pub fn new(clerk: C, key: impl Into<String>) -> Self {
        Self {
            clerk,
            key: key.into(),
            config: LockConfig::default(),
        }
    }

    /// Sets the retry configuration.
    pub fn with_config(mut self, config: LockConfig) -> Self {
        self.config = config;
        self
    }

    async fn wait(&self) {
        tokio::time::sleep(self.config.retry_interval).await;
    }
}

#[async_trait]
impl<C: KvClerk> Locker for NaiveLock<C> {
    async fn acquire(&self) {
        if let Err(KvError::NoKey) = self.clerk.get(&self.key).await {
            let _ = self.clerk.put(&self.key, FREE, 0).await;
        }

        loop {
            match self.clerk.get(&self.key).await {
                Ok(v) if v.value != HELD => {
                    if self.clerk.put(&self.key, HELD, v.version).await.is_ok() {
                        debug!(key = %self.key, version = v.version, "naive lock acquired");
                        return;
                    }
                }
                other => trace!(key = %self.key, observed = ?other, "naive lock busy"),
            }
            self.wait().await;
        }
    }

    async fn release(&self) -> Result<()> {
        let observed = self.clerk.get(&self.key).await;
        let version = match &observed {
            Ok(v) if v.value == HELD => v.version,
            _ => return Err(LockError::not_held(&self.key, None, &observed)),
        };

        match self.clerk.put(&self.key, FREE, version).await {
            Ok(()) | Err(KvError::Maybe) => {
                debug!(key = %self.key, version, "naive lock released");
                Ok(())
            }
            Err(code) => Err(LockError::release_rejected(&self.key, None, code)),
        }
    }

    fn key(&self) -> &str {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{clerk, shared_store};
    use kvlock_core::VersionedValue;
    use std::sync::Arc;
    use std::time::Duration;

    fn fast() -> LockConfig {
        LockConfig::default().with_retry_interval(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_acquire_release() {
        let store = shared_store();
        let lock = NaiveLock::new(clerk(&store), "l").with_config(fast());

        lock.acquire().await;
        assert_eq!(clerk(&store).get("l").await, Ok(VersionedValue::new(HELD, 2)));

        lock.release().await.unwrap();
        assert_eq!(clerk(&store).get("l").await, Ok(VersionedValue::new(FREE, 3)));
    }

    #[tokio::test]
    async fn test_release_without_acquire() {
        let store = shared_store();
        let lock = NaiveLock::new(clerk(&store), "l");
        assert!(matches!(
            lock.release().await,
            Err(LockError::NotHeld { lock_id: None, .. })
        ));
    }

    #[tokio::test]
    async fn test_second_acquirer_waits() {
        let store = shared_store();
        let a = NaiveLock::new(clerk(&store), "l").with_config(fast());
        let b = Arc::new(NaiveLock::new(clerk(&store), "l").with_config(fast()));

        a.acquire().await;
        let pending = tokio::spawn({
            let b = b.clone();
            async move { b.acquire().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        a.release().await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .unwrap()
            .unwrap();
        b.release().await.unwrap();
    }
}
