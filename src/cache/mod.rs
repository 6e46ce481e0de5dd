//! Shared cache primitives used by the rate limiter and the token cache.
//!
//! Two operations need cross-instance ordering, and both are a
//! compare-and-swap on a single watched key:
//! [`SharedCache::update_counter`] on a counter and
//! [`SharedCache::set_all_if_newer`] on a generation key. Backends must abort
//! the write when the watched key changed between the read and the commit and
//! report that as `Ok(None)` so the caller can retry.

pub mod redis;

#[cfg(test)]
pub(crate) mod memory;

use std::future::Future;
use std::time::Duration;

pub use self::redis::RedisCache;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache command failed: {0}")]
    Command(#[from] ::redis::RedisError),

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Write chosen for a counter after reading its current value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CounterWrite {
    /// Add one to the counter; `ttl` is set only when opening a new window.
    Increment { ttl: Option<Duration> },
    /// Leave the count alone and push the expiry out to `ttl` from now.
    Extend { ttl: Duration },
}

/// A committed counter transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CounterCommit {
    /// Count observed under the watch (absent keys read as zero).
    pub previous: u64,
    pub write: CounterWrite,
}

/// Result of a committed [`SharedCache::set_all_if_newer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Publish {
    Written,
    /// A write with generation `current` (at least ours) already landed.
    Stale { current: u64 },
}

pub trait SharedCache: Send + Sync {
    /// Read the counter at `key`, let `decide` pick the write, and commit it
    /// only if nobody touched the key in between.
    ///
    /// Returns `Ok(None)` when the commit was aborted by a concurrent writer.
    fn update_counter<F>(
        &self,
        key: &str,
        decide: F,
    ) -> impl Future<Output = Result<Option<CounterCommit>, CacheError>> + Send
    where
        F: FnOnce(u64) -> CounterWrite + Send;

    fn delete(&self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Write every `(key, value)` pair, and `generation` under
    /// `generation_key`, with the same TTL in one transaction. Nothing is
    /// written when `generation_key` already holds `generation` or more.
    ///
    /// Returns `Ok(None)` when the commit was aborted by a concurrent writer.
    fn set_all_if_newer(
        &self,
        generation_key: &str,
        generation: u64,
        entries: &[(String, String)],
        ttl: Duration,
    ) -> impl Future<Output = Result<Option<Publish>, CacheError>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, CacheError>> + Send;

    fn ping(&self) -> impl Future<Output = Result<(), CacheError>> + Send;
}

/// Redis expiries are whole seconds; never round a TTL down to "no expiry".
pub(crate) fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}
