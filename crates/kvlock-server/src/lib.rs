//! kvlock server - the versioned key-value store.
//!
//! [`KeyValueStore`] holds the data; [`KvServer`] exposes it as the
//! `KVServer` RPC service with methods `Get` and `Put`.

pub mod service;
pub mod store;

pub use service::KvServer;
pub use store::KeyValueStore;
