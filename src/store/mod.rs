//! # Shared State Store
//!
//! Abstraction over the key/value service that both the data plane and the
//! admin plane read and write. The gateway only relies on single-key
//! atomicity (TTL-set, hash increment, list trim, sorted-set add); no
//! multi-key transactions are required.
//!
//! The bundled [`MemoryStore`] keeps everything in process and is the
//! default for single-instance deployments. A networked backend plugs in
//! behind the [`StateStore`] trait.

mod error;
pub mod keys;
mod memory;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;

use async_trait::async_trait;
use std::time::Duration;

/// Operations the gateway needs from the shared state store.
///
/// Every method is a single-key operation and must be atomic with respect
/// to concurrent callers of the same key.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get a plain value.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set a plain value with a time-to-live.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Delete a key of any type. Returns whether the key existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Refresh the TTL of an existing key. No-op if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()>;

    /// Get one field of a hash.
    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// Set one field of a hash, creating the hash if needed.
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    /// Remove one field of a hash. Returns whether the field existed.
    async fn hash_remove(&self, key: &str, field: &str) -> StoreResult<bool>;

    /// All (field, value) pairs of a hash.
    async fn hash_entries(&self, key: &str) -> StoreResult<Vec<(String, String)>>;

    /// Atomically add `by` to an integer hash field, creating it at zero.
    /// Returns the new value.
    async fn hash_increment(&self, key: &str, field: &str, by: i64) -> StoreResult<i64>;

    /// Push a value onto the front of a list. Returns the new length.
    async fn list_push_front(&self, key: &str, value: &str) -> StoreResult<u64>;

    /// Trim a list to its first `max_len` entries.
    async fn list_trim(&self, key: &str, max_len: u64) -> StoreResult<()>;

    /// The first `limit` entries of a list, front to back.
    async fn list_range(&self, key: &str, limit: u64) -> StoreResult<Vec<String>>;

    /// Add a member to a sorted set with the given score, replacing any
    /// previous score for the member.
    async fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> StoreResult<()>;

    /// Members with `min <= score <= max`, ordered by ascending score.
    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> StoreResult<Vec<String>>;

    /// Remove members with score strictly below `cutoff`. Returns how many
    /// were removed.
    async fn sorted_set_remove_below(&self, key: &str, cutoff: f64) -> StoreResult<u64>;

    /// Whether the backend is reachable.
    fn is_healthy(&self) -> bool;
}
