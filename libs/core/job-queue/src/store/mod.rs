//! Store primitives the queue engine is built from.
//!
//! Every method maps to one atomic operation on the backing store. The
//! engine holds no locks of its own; its correctness rests entirely on the
//! atomicity of these calls.

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use crate::config::BlockFor;
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append `value` to the tail of `list`.
    async fn push(&self, list: &str, value: &str) -> Result<()>;

    /// Add `value` to the sorted set `set` with `score`.
    async fn schedule(&self, set: &str, score: f64, value: &str) -> Result<()>;

    /// Pop the head of `list`, waiting up to `block` for one to arrive.
    async fn blocking_pop(&self, list: &str, block: BlockFor) -> Result<Option<String>>;

    /// Wait up to `block` until `list` is non-empty, without removing anything.
    ///
    /// Returns `false` on timeout.
    async fn wait_ready(&self, list: &str, block: BlockFor) -> Result<bool>;

    /// Atomically pop the head of `list` and add it to `set` with `score`.
    async fn claim(&self, list: &str, set: &str, score: f64) -> Result<Option<String>>;

    /// Atomically move every member of `set` scored at or below `max_score`
    /// to the tail of `list`, lowest score first. Returns how many moved.
    async fn promote_due(&self, set: &str, list: &str, max_score: f64) -> Result<usize>;

    /// Remove one occurrence of `value` from `list`.
    async fn remove_from_list(&self, list: &str, value: &str) -> Result<bool>;

    /// Remove `value` from the sorted set `set`.
    async fn remove_scored(&self, set: &str, value: &str) -> Result<bool>;

    /// Up to `limit` entries from the head of `list`.
    async fn range(&self, list: &str, limit: usize) -> Result<Vec<String>>;

    async fn list_len(&self, list: &str) -> Result<u64>;

    async fn scored_len(&self, set: &str) -> Result<u64>;

    /// Atomically move all of `source` to the tail of `dest`. Returns how many moved.
    async fn drain_list(&self, source: &str, dest: &str) -> Result<usize>;

    /// Delete keys. Returns how many existed.
    async fn delete(&self, keys: &[&str]) -> Result<u64>;
}
