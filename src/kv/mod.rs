//! Shared key/value store contract
//!
//! Threshold counters and suppression latches live in a store shared across
//! all nodes (and, in a deployment, across the cluster). The engine only
//! depends on this contract; any backend providing single-key atomic
//! `SETNX`/`INCR` and TTL expiry is acceptable.

/// In-memory implementation backed by a concurrent map
pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use std::sync::Arc;

use crate::Result;

/// Atomic counter/TTL surface used by thresholds and suppression
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value with a TTL in seconds (0 = no expiry)
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Set the value only if the key is absent; returns whether it was set.
    /// The TTL applies only when the set happens.
    async fn setnx(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool>;

    /// Atomically increment an integer value by one, creating it at 1
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Atomically increment an integer value by `delta`, creating it at `delta`
    async fn incrby(&self, key: &str, delta: i64) -> Result<i64>;

    /// Delete a key; deleting an absent key is not an error
    async fn del(&self, key: &str) -> Result<()>;

    /// List live keys matching a glob; only the trailing-`*` form is required
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Liveness probe
    async fn ping(&self) -> Result<bool>;
}

/// Shared handle to a store implementation
pub type SharedStore = Arc<dyn KvStore>;
