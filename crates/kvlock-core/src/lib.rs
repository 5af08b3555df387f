//! kvlock core - data model shared by the store, clerks, locks and checker.
//!
//! This crate defines the types that flow through the whole system:
//!
//! - [`types`]: keys, versions, versioned values and the [`KvError`] codes
//! - [`rpc`]: argument and reply messages for the `KVServer` RPC service
//! - [`node`]: client identification
//! - [`operation`]: timestamped operation records for linearizability checks
//! - [`history`]: the shared append-only [`OpLog`] and frozen [`History`]
//!
//! # Example
//!
//! ```
//! use kvlock_core::{ClientId, KvInput, KvOutput, OpLog, VersionedValue};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let log = OpLog::new();
//! let call = log.timestamp();
//! let ret = log.timestamp();
//! log.append(
//!     ClientId(0),
//!     KvInput::get("x"),
//!     KvOutput::Get(Ok(VersionedValue::new("v", 1))),
//!     call,
//!     ret,
//! )
//! .await;
//! assert_eq!(log.len().await, 1);
//! # }
//! ```

pub mod history;
pub mod node;
pub mod operation;
pub mod rpc;
pub mod types;

pub use history::{History, HistoryMetadata, OpLog, RunId};
pub use node::ClientId;
pub use operation::{KvInput, KvOutput, Operation, OperationId, Timestamp};
pub use rpc::{GetArgs, GetReply, PutArgs, PutReply, GET_METHOD, PUT_METHOD, SERVICE_NAME};
pub use types::{status_code, Key, KvError, KvResult, Version, VersionedValue, OK};
