//! Operation records for linearizability checking.
//!
//! Every completed clerk call becomes one [`Operation`]: what was asked
//! (`input`), what came back (`output`), who asked (`client`) and the
//! monotonic interval `[call, ret]` during which the call was outstanding.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::node::ClientId;
use crate::types::{status_code, Key, KvResult, Version, VersionedValue};

/// Nanoseconds since the owning log was created, taken from a monotonic clock.
pub type Timestamp = u64;

/// Unique identifier for an operation within a test run.
///
/// Operation IDs are assigned sequentially in append order.
///
/// # Examples
///
/// ```
/// use kvlock_core::operation::OperationId;
///
/// let op_id = OperationId(1);
/// assert_eq!(op_id.inner(), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(pub u64);

impl OperationId {
    /// Creates a new OperationId with the given value.
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the inner value of the OperationId.
    #[inline]
    pub const fn inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperationId({})", self.0)
    }
}

/// Input of a key-value operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KvInput {
    /// Read a key.
    Get { key: Key },
    /// Version-checked write of a key.
    Put {
        key: Key,
        value: String,
        version: Version,
    },
}

impl KvInput {
    /// Creates a get input.
    pub fn get(key: impl Into<Key>) -> Self {
        Self::Get { key: key.into() }
    }

    /// Creates a put input.
    pub fn put(key: impl Into<Key>, value: impl Into<String>, version: Version) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
            version,
        }
    }

    /// Returns the key this operation addresses.
    pub fn key(&self) -> &str {
        match self {
            Self::Get { key } | Self::Put { key, .. } => key,
        }
    }
}

impl fmt::Display for KvInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get { key } => write!(f, "get({:?})", key),
            Self::Put {
                key,
                value,
                version,
            } => write!(f, "put({:?}, {:?}, {})", key, value, version),
        }
    }
}

/// Observed output of a key-value operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KvOutput {
    /// Result of a get.
    Get(KvResult<VersionedValue>),
    /// Result of a put.
    Put(KvResult<()>),
}

impl KvOutput {
    /// Returns the wire code of the result.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Get(r) => status_code(r),
            Self::Put(r) => status_code(r),
        }
    }
}

impl fmt::Display for KvOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get(Ok(v)) => write!(f, "{}", v),
            Self::Get(Err(e)) | Self::Put(Err(e)) => write!(f, "{}", e),
            Self::Put(Ok(())) => write!(f, "OK"),
        }
    }
}

/// A completed operation with its real-time interval.
///
/// # Type Parameters
///
/// * `I` - The operation input, e.g. [`KvInput`].
/// * `O` - The observed output, e.g. [`KvOutput`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation<I, O> {
    /// The unique identifier for this operation.
    pub id: OperationId,

    /// The client that issued this operation.
    pub client: ClientId,

    /// What the client asked for.
    pub input: I,

    /// What the client observed.
    pub output: O,

    /// When the call was issued.
    pub call: Timestamp,

    /// When the call returned.
    pub ret: Timestamp,
}

impl<I, O> Operation<I, O> {
    /// Creates a new operation record.
    pub fn new(
        id: OperationId,
        client: ClientId,
        input: I,
        output: O,
        call: Timestamp,
        ret: Timestamp,
    ) -> Self {
        Self {
            id,
            client,
            input,
            output,
            call,
            ret,
        }
    }

    /// Returns true if this operation returned before `other` was called.
    ///
    /// Such operations must appear in this order in every linearization.
    pub fn precedes(&self, other: &Self) -> bool {
        self.ret < other.call
    }

    /// Returns true if the intervals of the two operations overlap.
    pub fn overlaps(&self, other: &Self) -> bool {
        !self.precedes(other) && !other.precedes(self)
    }
}

impl<I: fmt::Display, O: fmt::Display> fmt::Display for Operation<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Op[{} @ {}] {} -> {} [{}, {}]",
            self.id, self.client, self.input, self.output, self.call, self.ret
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KvError;

    fn op(call: u64, ret: u64) -> Operation<KvInput, KvOutput> {
        Operation::new(
            OperationId(0),
            ClientId(0),
            KvInput::get("k"),
            KvOutput::Get(Err(KvError::NoKey)),
            call,
            ret,
        )
    }

    #[test]
    fn test_real_time_order() {
        let a = op(0, 10);
        let b = op(11, 20);
        let c = op(5, 15);

        assert!(a.precedes(&b));
        assert!(!b.precedes(&a));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
    }

    #[test]
    fn test_display() {
        let put = KvInput::put("x", "v", 0);
        assert_eq!(put.to_string(), "put(\"x\", \"v\", 0)");
        assert_eq!(put.key(), "x");
        assert_eq!(KvOutput::Put(Err(KvError::Maybe)).code(), "ErrMaybe");
        assert_eq!(
            KvOutput::Get(Ok(VersionedValue::new("v", 1))).to_string(),
            "\"v\"@v1"
        );
    }
}
