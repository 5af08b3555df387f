//! kvlock checker - linearizability checking of operation histories.
//!
//! # Overview
//!
//! A [`Model`] describes the object sequentially. The [`LinearizabilityChecker`]
//! searches for an order of the recorded operations that respects real time
//! and is accepted by the model step by step. [`KvModel`] specifies the
//! versioned key-value store, including ambiguous `ErrMaybe` puts.
//!
//! # Verdicts
//!
//! - [`CheckStatus::Legal`]: a linearization exists.
//! - [`CheckStatus::Illegal`]: none exists; the [`Counterexample`] lists the
//!   longest linearizable prefix and the operations left over.
//! - [`CheckStatus::Unknown`]: the search ran out of time or states.

pub mod kv_model;
pub mod linearizability;
pub mod result;
pub mod traits;

pub use kv_model::KvModel;
pub use linearizability::{LinearizabilityChecker, LinearizabilityConfig};
pub use result::{CheckResult, CheckStats, CheckStatus, Counterexample, CounterexampleOp};
pub use traits::Model;
