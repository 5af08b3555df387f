//! Keys, versions and the result codes of the versioned key-value store.
//!
//! The store speaks a tiny vocabulary: `OK`, `ErrNoKey`, `ErrVersion` and the
//! client-synthesized `ErrMaybe`. `OK` is the `Ok` arm of [`KvResult`]; the
//! other three are [`KvError`] variants.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Opaque key identifier.
pub type Key = String;

/// Per-key version number. `0` means "the key does not exist".
pub type Version = u64;

/// Wire code of a successful call.
pub const OK: &str = "OK";

/// A value together with the version that produced it.
///
/// A stored value always has `version >= 1`: the creating put installs
/// version 1 and every later successful put increments it by exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionedValue {
    /// The stored value.
    pub value: String,
    /// The version of the stored value.
    pub version: Version,
}

impl VersionedValue {
    /// Creates a new versioned value.
    pub fn new(value: impl Into<String>, version: Version) -> Self {
        Self {
            value: value.into(),
            version,
        }
    }
}

impl fmt::Display for VersionedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@v{}", self.value, self.version)
    }
}

/// Non-`OK` outcomes of a store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
pub enum KvError {
    /// The key does not exist, or a non-zero version was given for an absent key.
    #[error("ErrNoKey")]
    NoKey,

    /// The expected version does not match the stored one.
    #[error("ErrVersion")]
    Version,

    /// The put may or may not have been applied; only the clerk produces this.
    #[error("ErrMaybe")]
    Maybe,
}

impl KvError {
    /// Returns the wire code of this error.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoKey => "ErrNoKey",
            Self::Version => "ErrVersion",
            Self::Maybe => "ErrMaybe",
        }
    }

    /// Returns true if the store itself can produce this error.
    ///
    /// `Maybe` is synthesized by the clerk after a transport retry and never
    /// comes from the store.
    pub const fn is_definitive(&self) -> bool {
        matches!(self, Self::NoKey | Self::Version)
    }
}

/// Result of a store call.
pub type KvResult<T> = Result<T, KvError>;

/// Returns the wire code of a result, `OK` for success.
pub fn status_code<T>(result: &KvResult<T>) -> &'static str {
    match result {
        Ok(_) => OK,
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(KvError::NoKey.to_string(), "ErrNoKey");
        assert_eq!(KvError::Version.to_string(), "ErrVersion");
        assert_eq!(KvError::Maybe.code(), "ErrMaybe");
        assert_eq!(status_code::<()>(&Ok(())), "OK");
        assert_eq!(status_code::<()>(&Err(KvError::Version)), "ErrVersion");
    }

    #[test]
    fn test_definitive_errors() {
        assert!(KvError::NoKey.is_definitive());
        assert!(KvError::Version.is_definitive());
        assert!(!KvError::Maybe.is_definitive());
    }

    #[test]
    fn test_versioned_value_display() {
        let v = VersionedValue::new("abc", 3);
        assert_eq!(v.to_string(), "\"abc\"@v3");
    }
}
