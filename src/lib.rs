//! valkey-cluster-cache library
//!
//! Slot-aware key/value cache client for Valkey/Redis clusters: keys are
//! hashed to slots, slots are routed to pooled node connections, and the
//! routing table is rebuilt when the cluster reports a topology change.

pub mod cache;
pub mod client;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheLock, ClusterCache, Expiry, LockOptions, SetOptions};
pub use config::CacheConfig;
pub use utils::{CacheError, Result};
