//! Shared keyed store.
//!
//! Every piece of cross-request state (cached identities, revoked token ids,
//! lockout counters and rate windows) lives behind [`KeyedStore`], never in
//! process memory, so any number of `warden` instances can serve the same
//! accounts.
//!
//! Two backends are provided:
//!
//! - [`RedisStore`]: Redis/Valkey. Compare-and-set runs as `WATCH`/`MULTI`/`EXEC`
//!   on a connection held for the whole sequence, and the sliding window runs as
//!   a Lua script using the server clock.
//! - [`MemoryStore`]: single process, honours TTLs against the tokio clock.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use std::time::Duration;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(#[from] ::redis::RedisError),
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("transaction on {key} still conflicting after {attempts} attempts")]
    Contended { key: String, attempts: u32 },
    #[error("failed to encode store value: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// A single write inside an atomic [`KeyedStore::compare_and_apply`] batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Write {
    /// Set `key`; `ttl: None` keeps the key until it is deleted.
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
    },
}

impl Write {
    pub fn set(key: impl Into<String>, value: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self::Set {
            key: key.into(),
            value: value.into(),
            ttl,
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }
}

#[async_trait]
pub trait KeyedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Apply `writes` atomically, but only if every watched key still holds its
    /// expected value (`None` meaning absent) at commit time.
    ///
    /// Returns `Ok(false)` on conflict; the caller re-reads and retries.
    async fn compare_and_apply(
        &self,
        watched: &[(&str, Option<&str>)],
        writes: &[Write],
    ) -> Result<bool, StoreError>;

    /// Prune markers older than `window`, then record one marker for this call
    /// if fewer than `limit` remain. Runs as one indivisible step.
    ///
    /// Returns `true` when the call was admitted and recorded.
    async fn admit_sliding_window(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<bool, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Millisecond TTL for `SET ... PX`; never zero so a key is not written without expiry.
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}
