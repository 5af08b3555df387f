//! Lock protocol errors.

use thiserror::Error;

use kvlock_core::{KvError, KvResult, VersionedValue};

/// Errors returned by [`Locker::release`](crate::Locker::release).
///
/// Both variants mean the protocol was broken. Callers should not retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The lock key does not carry this instance's held tag.
    #[error("lock {key} not held by {}: observed {observed}", .lock_id.as_deref().unwrap_or("naive holder"))]
    NotHeld {
        key: String,
        lock_id: Option<String>,
        observed: String,
    },

    /// The store refused to free the lock: the key changed while it was held.
    #[error("release of lock {key} rejected with {code}")]
    ReleaseRejected {
        key: String,
        lock_id: Option<String>,
        code: KvError,
    },
}

impl LockError {
    /// Creates a not-held error from what a read of the lock key returned.
    pub fn not_held(
        key: impl Into<String>,
        lock_id: Option<&str>,
        observed: &KvResult<VersionedValue>,
    ) -> Self {
        Self::NotHeld {
            key: key.into(),
            lock_id: lock_id.map(str::to_string),
            observed: describe(observed),
        }
    }

    /// Creates a release-rejected error.
    pub fn release_rejected(key: impl Into<String>, lock_id: Option<&str>, code: KvError) -> Self {
        Self::ReleaseRejected {
            key: key.into(),
            lock_id: lock_id.map(str::to_string),
            code,
        }
    }
}

fn describe(result: &KvResult<VersionedValue>) -> String {
    match result {
        Ok(v) => v.to_string(),
        Err(e) => e.to_string(),
    }
}

/// Result type for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = LockError::not_held("l", Some("abcdefgh"), &Ok(VersionedValue::new("noUseLock", 4)));
        assert_eq!(
            err.to_string(),
            "lock l not held by abcdefgh: observed \"noUseLock\"@v4"
        );

        let err = LockError::not_held("l", None, &Err(KvError::NoKey));
        assert_eq!(err.to_string(), "lock l not held by naive holder: observed ErrNoKey");

        let err = LockError::release_rejected("l", None, KvError::Version);
        assert_eq!(err.to_string(), "release of lock l rejected with ErrVersion");
    }
}
