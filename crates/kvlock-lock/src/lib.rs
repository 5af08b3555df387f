//! kvlock lock - mutual exclusion on top of the versioned store.
//!
//! A lock is a single key in the store. Its value says whether the lock is
//! free ([`FREE`]) or held. Acquiring is a version-checked put from free to
//! held, so at most one writer can win each version.
//!
//! Two variants are provided:
//!
//! - [`NaiveLock`] writes an anonymous [`HELD`] marker. It cannot tell its
//!   own ambiguous write from somebody else's, so it is only correct over a
//!   transport that never drops calls.
//! - [`RobustLock`] writes a per-instance tag `useLock(<id>)` and re-reads
//!   the key after every write. Reading back its own tag confirms the
//!   acquisition whether the put reported `OK` or `ErrMaybe`.

use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

pub mod error;
pub mod naive;
pub mod robust;

pub use error::{LockError, Result};
pub use naive::NaiveLock;
pub use robust::RobustLock;

/// Value of a free lock key.
pub const FREE: &str = "noUseLock";

/// Value of a lock key held by a [`NaiveLock`].
pub const HELD: &str = "useLock";

/// Length of a random lock id.
pub const LOCK_ID_LEN: usize = 8;

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Returns a random string of `n` ASCII letters.
pub fn random_letters(n: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char)
        .collect()
}

/// Returns the value a [`RobustLock`] with `lock_id` writes to claim the key.
pub fn held_tag(lock_id: &str) -> String {
    format!("{}({})", HELD, lock_id)
}

/// Tuning for lock retry loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    /// Wait before re-reading a lock key that is held or unreadable.
    pub retry_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(100),
        }
    }
}

impl LockConfig {
    /// Sets the retry interval.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }
}

/// A distributed lock.
#[async_trait]
pub trait Locker: Send + Sync {
    /// Blocks until this instance holds the lock.
    async fn acquire(&self);

    /// Frees the lock held by this instance.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] if this instance does not hold the lock or the
    /// store refused to free it.
    async fn release(&self) -> Result<()>;

    /// The key the lock lives under.
    fn key(&self) -> &str;
}

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use kvlock_client::{Clerk, KvClerk};
    use kvlock_core::{KvError, KvResult, Version, VersionedValue};
    use kvlock_server::KvServer;
    use kvlock_transport::LocalTransport;

    pub(crate) type LocalClerk = Clerk<Arc<LocalTransport>>;

    pub(crate) fn shared_store() -> Arc<LocalTransport> {
        Arc::new(LocalTransport::new().with_server("kv", KvServer::new().into_server()))
    }

    pub(crate) fn clerk(transport: &Arc<LocalTransport>) -> LocalClerk {
        Clerk::new(transport.clone(), "kv")
    }

    /// Applies every put but reports the first `n` as `ErrMaybe`.
    pub(crate) struct MaybeClerk<C> {
        pub(crate) inner: C,
        pub(crate) maybes: AtomicU32,
    }

    impl<C> MaybeClerk<C> {
        pub(crate) fn new(inner: C, n: u32) -> Self {
            Self {
                inner,
                maybes: AtomicU32::new(n),
            }
        }
    }

    #[async_trait]
    impl<C: KvClerk> KvClerk for MaybeClerk<C> {
        async fn get(&self, key: &str) -> KvResult<VersionedValue> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: &str, version: Version) -> KvResult<()> {
            let result = self.inner.put(key, value, version).await;
            let masked = self
                .maybes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if masked {
                Err(KvError::Maybe)
            } else {
                result
            }
        }
    }
}
