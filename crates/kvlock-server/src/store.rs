//! The versioned key-value store.

use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

use kvlock_core::{Key, KvError, KvResult, Version, VersionedValue};

/// A single-node key-value store with per-key version checks.
///
/// Every put names the version it expects to overwrite. Version `0` means
/// "create": it succeeds only if the key does not exist yet. Every
/// successful put on a key bumps its version by one, starting at one.
///
/// # Example
///
/// ```
/// use kvlock_core::{KvError, VersionedValue};
/// use kvlock_server::KeyValueStore;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = KeyValueStore::new();
/// store.put("x", "a", 0).await.unwrap();
/// assert_eq!(store.get("x").await, Ok(VersionedValue::new("a", 1)));
/// assert_eq!(store.put("x", "b", 0).await, Err(KvError::Version));
/// # }
/// ```
#[derive(Debug, Default)]
pub struct KeyValueStore {
    data: Mutex<HashMap<Key, VersionedValue>>,
}

impl KeyValueStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value and version stored under `key`.
    pub async fn get(&self, key: &str) -> KvResult<VersionedValue> {
        self.data
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or(KvError::NoKey)
    }

    /// Writes `value` under `key` if the stored version equals `expected`.
    pub async fn put(
        &self,
        key: impl Into<Key>,
        value: impl Into<String>,
        expected: Version,
    ) -> KvResult<()> {
        let key = key.into();
        let mut data = self.data.lock().await;
        let stored = data.get(&key).map(|v| v.version);

        let result = match (stored, expected) {
            (None, 0) => {
                data.insert(key.clone(), VersionedValue::new(value, 1));
                Ok(())
            }
            (None, _) => Err(KvError::NoKey),
            (Some(current), expected) if current == expected => {
                data.insert(key.clone(), VersionedValue::new(value, current + 1));
                Ok(())
            }
            (Some(_), _) => Err(KvError::Version),
        };

        debug!(
            key = %key,
            expected,
            stored = ?stored,
            outcome = kvlock_core::status_code(&result),
            "put"
        );
        result
    }

    /// Number of keys in the store.
    pub async fn len(&self) -> usize {
        self.data.lock().await.len()
    }

    /// Returns true if the store holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.data.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_versions_increase_by_one() {
        let store = KeyValueStore::new();
        store.put("k", "v0", 0).await.unwrap();
        for version in 1..=20 {
            assert_eq!(store.get("k").await.unwrap().version, version);
            store.put("k", format!("v{}", version), version).await.unwrap();
        }
        assert_eq!(store.get("k").await, Ok(VersionedValue::new("v20", 21)));
    }

    #[tokio::test]
    async fn test_create_only_when_absent() {
        let store = KeyValueStore::new();
        assert_eq!(store.put("k", "a", 3).await, Err(KvError::NoKey));
        assert!(store.is_empty().await);

        assert_eq!(store.put("k", "a", 0).await, Ok(()));
        assert_eq!(store.put("k", "b", 0).await, Err(KvError::Version));
        assert_eq!(store.put("k", "b", 2).await, Err(KvError::Version));
        assert_eq!(store.get("k").await, Ok(VersionedValue::new("a", 1)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_creates_single_winner() {
        let store = Arc::new(KeyValueStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.put("k", format!("{}", i), 0).await
            }));
        }

        let mut wins = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(store.get("k").await.unwrap().version, 1);
    }
}
