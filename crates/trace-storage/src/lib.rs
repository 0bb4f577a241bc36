//! Persistent storage backends for the trace ledger.

pub mod sled_store;

pub use sled_store::SledStore;
