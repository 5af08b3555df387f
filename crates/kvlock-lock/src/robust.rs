//! Lock that tolerates ambiguous puts.
//!
//! Each instance writes its own held tag `useLock(<id>)`. After every
//! acquiring put the instance reads the key back:
//!
//! | Read back             | Meaning                                    |
//! |-----------------------|--------------------------------------------|
//! | own tag               | acquired, whatever the put reported        |
//! | another holder's tag  | lost the race, wait and start over         |
//! | free                  | our put did not apply, wait and start over |
//! | read error            | read again                                 |
//!
//! Only the instance whose tag is stored can pass validation, so two
//! instances never both return from `acquire`.

use async_trait::async_trait;
use tracing::{debug, info, trace};

use kvlock_client::KvClerk;
use kvlock_core::{KvError, Version};

use crate::error::{LockError, Result};
use crate::{held_tag, random_letters, LockConfig, Locker, FREE, LOCK_ID_LEN};

/// A lock whose holder is identified by a random per-instance id.
#[derive(Debug)]
pub struct RobustLock<C> {
    clerk: C,
    key: String,
    lock_id: String,
    held_tag: String,
    config: LockConfig,
}

impl<C: KvClerk> RobustLock<C> {
    /// Creates a lock on `key` with a fresh random id.
    pub fn new(clerk: C, key: impl Into<String>) -> Self {
        Self::with_lock_id(clerk, key, random_letters(LOCK_ID_LEN))
    }

    /// Creates a lock on `key` with a caller-chosen id.
    pub fn with_lock_id(clerk: C, key: impl Into<String>, lock_id: impl Into<String>) -> Self {
        let lock_id = lock_id.into();
        Self {
            clerk,
            key: key.into(),
            held_tag: held_tag(&lock_id),
            lock_id,
            config: LockConfig::default(),
        }
    }

    /// Sets the retry configuration.
    pub fn with_config(mut self, config: LockConfig) -> Self {
        self.config = config;
        self
    }

    /// The random id of this instance.
    pub fn lock_id(&self) -> &str {
        &self.lock_id
    }

    /// The value this instance stores while holding the lock.
    pub fn held_tag(&self) -> &str {
        &self.held_tag
    }

    async fn wait(&self) {
        tokio::time::sleep(self.config.retry_interval).await;
    }

    async fn create_free(&self) {
        let result = self.clerk.put(&self.key, FREE, 0).await;
        trace!(
            key = %self.key,
            lock_id = %self.lock_id,
            outcome = kvlock_core::status_code(&result),
            "initialized lock key"
        );
    }

    /// Reads the key until it is free or carries our own tag.
    async fn try_get_version(&self) -> Version {
        loop {
            match self.clerk.get(&self.key).await {
                Ok(v) if v.value == FREE || v.value == self.held_tag => return v.version,
                Ok(v) => {
                    trace!(key = %self.key, lock_id = %self.lock_id, holder = %v.value, "lock busy");
                }
                Err(KvError::NoKey) => {
                    self.create_free().await;
                    continue;
                }
                Err(e) => trace!(key = %self.key, lock_id = %self.lock_id, error = %e, "read failed"),
            }
            self.wait().await;
        }
    }

    /// Re-reads the key and reports whether our tag is stored.
    async fn validate(&self) -> bool {
        loop {
            match self.clerk.get(&self.key).await {
                Ok(v) => return v.value == self.held_tag,
                Err(e) => {
                    trace!(key = %self.key, lock_id = %self.lock_id, error = %e, "validation read failed");
                    self.wait().await;
                }
            }
        }
    }
}

#[async_trait]
impl<C: KvClerk> Locker for RobustLock<C> {
    async fn acquire(&self) {
        if let Err(KvError::NoKey) = self.clerk.get(&self.key).await {
            self.create_free().await;
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let version = self.try_get_version().await;
            let result = self.clerk.put(&self.key, &self.held_tag, version).await;
            debug!(
                key = %self.key,
                lock_id = %self.lock_id,
                version,
                outcome = kvlock_core::status_code(&result),
                "acquire put"
            );

            if self.validate().await {
                info!(key = %self.key, lock_id = %self.lock_id, attempts, "lock acquired");
                return;
            }
            self.wait().await;
        }
    }

    async fn release(&self) -> Result<()> {
        let observed = self.clerk.get(&self.key).await;
        let version = match &observed {
            Ok(v) if v.value == self.held_tag => v.version,
            _ => {
                return Err(LockError::not_held(
                    &self.key,
                    Some(self.lock_id.as_str()),
                    &observed,
                ))
            }
        };

        match self.clerk.put(&self.key, FREE, version).await {
            Ok(()) | Err(KvError::Maybe) => {
                info!(key = %self.key, lock_id = %self.lock_id, version, "lock released");
                Ok(())
            }
            Err(code) => Err(LockError::release_rejected(
                &self.key,
                Some(self.lock_id.as_str()),
                code,
            )),
        }
    }

    fn key(&self) -> &str {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{clerk, shared_store, MaybeClerk};
    use kvlock_core::{KvResult, VersionedValue};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Loses the first acquiring put to a rival: the rival's tag is stored
    /// instead and the put reports `ErrMaybe`.
    struct RivalClerk<C> {
        inner: C,
        own_tag: String,
        rival_tag: String,
        lost: AtomicBool,
    }

    #[async_trait]
    impl<C: KvClerk> KvClerk for RivalClerk<C> {
        async fn get(&self, key: &str) -> KvResult<VersionedValue> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: &str, version: Version) -> KvResult<()> {
            if value == self.own_tag && !self.lost.swap(true, Ordering::SeqCst) {
                self.inner.put(key, &self.rival_tag, version).await?;
                return Err(KvError::Maybe);
            }
            self.inner.put(key, value, version).await
        }
    }

    fn fast() -> LockConfig {
        LockConfig::default().with_retry_interval(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_acquire_writes_own_tag() {
        let store = shared_store();
        let lock = RobustLock::with_lock_id(clerk(&store), "l", "abcdefgh").with_config(fast());

        lock.acquire().await;
        assert_eq!(
            clerk(&store).get("l").await,
            Ok(VersionedValue::new("useLock(abcdefgh)", 2))
        );
        lock.release().await.unwrap();
        assert_eq!(clerk(&store).get("l").await.unwrap().value, FREE);
    }

    #[tokio::test]
    async fn test_ambiguous_acquire_is_confirmed() {
        let store = shared_store();
        // Both the init put and the acquire put report ErrMaybe.
        let ck = MaybeClerk::new(clerk(&store), 2);
        let lock = RobustLock::new(ck, "l").with_config(fast());

        tokio::time::timeout(Duration::from_secs(2), lock.acquire())
            .await
            .unwrap();
        assert_eq!(clerk(&store).get("l").await.unwrap().value, lock.held_tag());
        lock.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_lost_ambiguous_acquire_waits_for_rival() {
        let store = shared_store();
        let ck = RivalClerk {
            inner: clerk(&store),
            own_tag: held_tag("aaaaaaaa"),
            rival_tag: held_tag("rrrrrrrr"),
            lost: AtomicBool::new(false),
        };
        let lock = Arc::new(RobustLock::with_lock_id(ck, "l", "aaaaaaaa").with_config(fast()));

        let acquiring = tokio::spawn({
            let lock = lock.clone();
            async move { lock.acquire().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!acquiring.is_finished(), "entered with the rival holding the lock");
        assert_eq!(
            clerk(&store).get("l").await,
            Ok(VersionedValue::new("useLock(rrrrrrrr)", 2))
        );

        let rival = RobustLock::with_lock_id(clerk(&store), "l", "rrrrrrrr");
        rival.release().await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), acquiring)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(clerk(&store).get("l").await.unwrap().value, lock.held_tag());
        lock.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_release_by_non_holder() {
        let store = shared_store();
        let a = RobustLock::with_lock_id(clerk(&store), "l", "aaaaaaaa").with_config(fast());
        let b = RobustLock::with_lock_id(clerk(&store), "l", "bbbbbbbb").with_config(fast());

        a.acquire().await;
        let err = b.release().await.unwrap_err();
        assert_eq!(
            err,
            LockError::NotHeld {
                key: "l".into(),
                lock_id: Some("bbbbbbbb".into()),
                observed: "\"useLock(aaaaaaaa)\"@v2".into(),
            }
        );
        a.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_double_release() {
        let store = shared_store();
        let lock = RobustLock::new(clerk(&store), "l").with_config(fast());
        lock.acquire().await;
        lock.release().await.unwrap();
        assert!(matches!(lock.release().await, Err(LockError::NotHeld { .. })));
    }

    #[tokio::test]
    async fn test_contention_hands_off() {
        let store = shared_store();
        let holders = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let mut handles = Vec::new();

        for _ in 0..4 {
            let lock = RobustLock::new(clerk(&store), "l").with_config(fast());
            let holders = holders.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..5 {
                    lock.acquire().await;
                    let now = holders.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    assert_eq!(now, 0, "two holders");
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    holders.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                    lock.release().await.unwrap();
                }
            }));
        }

        for h in handles {
            tokio::time::timeout(Duration::from_secs(10), h)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
