//! kvlock harness - fixtures and workloads for exercising the store and
//! locks over a simulated network.
//!
//! A [`TestKv`] owns one `KVServer` on a [`Network`](kvlock_transport::Network)
//! and hands out [`LoggedClerk`]s that record every call in a shared
//! operation log. Workloads in [`workloads`] run concurrent clients through
//! [`TestKv::spawn_clients_and_wait`], check their own invariants, and then
//! ask the linearizability checker about the recorded history.
//!
//! # Example
//!
//! ```no_run
//! use kvlock_harness::{workloads, HarnessConfig, LockKind};
//!
//! # #[tokio::main]
//! # async fn main() -> kvlock_harness::Result<()> {
//! let config = HarnessConfig::default().with_reliable(false);
//! let total = workloads::run_lock_clients(&config, LockKind::Robust).await?;
//! println!("{} critical sections", total.ok);
//! # Ok(())
//! # }
//! ```

pub mod annotations;
pub mod config;
pub mod error;
pub mod logged_clerk;
pub mod stop;
pub mod test_kv;
pub mod workloads;

pub use annotations::{Annotation, Annotations, Timeline};
pub use config::{HarnessConfig, LoggingConfig, NetworkSettings, VisConfig, VisMode};
pub use error::{HarnessError, Result};
pub use logged_clerk::{LoggedClerk, OpCounter};
pub use stop::{stop_channel, StopHandle, StopSignal};
pub use test_kv::{ClientResult, TestClerk, TestKv};
pub use workloads::LockKind;
