//! Client identification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one simulated client within a test.
///
/// Each client issues its operations sequentially, so operations that share
/// a `ClientId` never overlap in time.
///
/// # Examples
///
/// ```
/// use kvlock_core::node::ClientId;
///
/// let client = ClientId(3);
/// assert_eq!(client.to_string(), "Client(3)");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u32);

impl ClientId {
    /// Creates a new ClientId with the given value.
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the inner value of the ClientId.
    #[inline]
    pub const fn inner(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Client({})", self.0)
    }
}

impl From<u32> for ClientId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}
