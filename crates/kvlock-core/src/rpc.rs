//! Messages of the `KVServer` RPC service.
//!
//! The replies carry an optional [`KvError`]; `None` is `OK`. Conversions to
//! and from [`KvResult`] keep the wire encoding out of the clerk and store
//! logic.

use serde::{Deserialize, Serialize};

use crate::types::{Key, KvError, KvResult, Version, VersionedValue};

/// Name under which the store service is registered.
pub const SERVICE_NAME: &str = "KVServer";

/// Fully qualified name of the get method.
pub const GET_METHOD: &str = "KVServer.Get";

/// Fully qualified name of the put method.
pub const PUT_METHOD: &str = "KVServer.Put";

/// Arguments of `KVServer.Get`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetArgs {
    pub key: Key,
}

/// Reply of `KVServer.Get`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetReply {
    pub value: String,
    pub version: Version,
    pub err: Option<KvError>,
}

impl GetReply {
    /// Converts the reply into a result.
    pub fn into_result(self) -> KvResult<VersionedValue> {
        match self.err {
            None => Ok(VersionedValue {
                value: self.value,
                version: self.version,
            }),
            Some(e) => Err(e),
        }
    }
}

impl From<KvResult<VersionedValue>> for GetReply {
    fn from(result: KvResult<VersionedValue>) -> Self {
        match result {
            Ok(v) => Self {
                value: v.value,
                version: v.version,
                err: None,
            },
            Err(e) => Self {
                value: String::new(),
                version: 0,
                err: Some(e),
            },
        }
    }
}

/// Arguments of `KVServer.Put`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutArgs {
    pub key: Key,
    pub value: String,
    pub version: Version,
}

/// Reply of `KVServer.Put`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutReply {
    pub err: Option<KvError>,
}

impl PutReply {
    /// Converts the reply into a result.
    pub fn into_result(self) -> KvResult<()> {
        match self.err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

impl From<KvResult<()>> for PutReply {
    fn from(result: KvResult<()>) -> Self {
        Self { err: result.err() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_reply_is_empty() {
        let reply = GetReply::from(Err(KvError::NoKey));
        assert_eq!(reply.value, "");
        assert_eq!(reply.version, 0);
        assert_eq!(reply.into_result(), Err(KvError::NoKey));
    }

    #[test]
    fn test_put_reply_wire_format() {
        let json = serde_json::to_string(&PutReply::from(Err(KvError::Version))).unwrap();
        assert_eq!(json, r#"{"err":"Version"}"#);

        let ok: PutReply = serde_json::from_str(r#"{"err":null}"#).unwrap();
        assert_eq!(ok.into_result(), Ok(()));
    }
}
