//! In-process [`SharedCache`] for tests.
//!
//! Expiry uses `tokio::time::Instant` so TTL behaviour can be driven with a
//! paused clock. Concurrent writers are simulated with
//! [`MemoryCache::inject_conflicts`]: the next N watched transactions lose the
//! race. A losing counter transaction sees another writer bump the counter
//! first; a losing generation write is simply aborted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use super::{CacheError, CounterCommit, CounterWrite, Publish, SharedCache};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    conflicts: u32,
    offline: bool,
    fail_deletes: bool,
    stall: Option<Duration>,
}

impl State {
    fn purge(&mut self, now: Instant) {
        self.entries
            .retain(|_, entry| !matches!(entry.expires_at, Some(at) if at <= now));
    }

    fn counter(&self, key: &str) -> u64 {
        self.entries
            .get(key)
            .and_then(|entry| entry.value.parse().ok())
            .unwrap_or(0)
    }

    fn bump(&mut self, key: &str, ttl: Option<Duration>, now: Instant) {
        let next = self.counter(key) + 1;
        let entry = self.entries.entry(key.to_string()).or_insert(Entry {
            value: String::new(),
            expires_at: None,
        });
        entry.value = next.to_string();
        if let Some(ttl) = ttl {
            entry.expires_at = Some(now + ttl);
        }
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct MemoryCache {
    state: Arc<Mutex<State>>,
}

impl MemoryCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("memory cache poisoned")
    }

    /// Make the next `count` watched commits abort as if another writer won.
    pub(crate) fn inject_conflicts(&self, count: u32) {
        self.lock().conflicts = count;
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub(crate) fn set_fail_deletes(&self, fail: bool) {
        self.lock().fail_deletes = fail;
    }

    /// Delay every operation by `delay` before it touches the state.
    pub(crate) fn set_stall(&self, delay: Option<Duration>) {
        self.lock().stall = delay;
    }

    pub(crate) fn value(&self, key: &str) -> Option<String> {
        let mut state = self.lock();
        state.purge(Instant::now());
        state.entries.get(key).map(|entry| entry.value.clone())
    }

    pub(crate) fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut state = self.lock();
        state.purge(now);
        state
            .entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at - now)
    }

    pub(crate) fn insert(&self, key: &str, value: &str, ttl: Duration) {
        self.lock().entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }

    async fn enter(&self) -> Result<(), CacheError> {
        let stall = self.lock().stall;
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        if self.lock().offline {
            return Err(CacheError::Unavailable("memory cache offline".to_string()));
        }
        Ok(())
    }
}

impl SharedCache for MemoryCache {
    async fn update_counter<F>(
        &self,
        key: &str,
        decide: F,
    ) -> Result<Option<CounterCommit>, CacheError>
    where
        F: FnOnce(u64) -> CounterWrite + Send,
    {
        self.enter().await?;
        let now = Instant::now();
        let mut state = self.lock();
        state.purge(now);

        let previous = state.counter(key);
        let write = decide(previous);

        if state.conflicts > 0 {
            state.conflicts -= 1;
            let ttl = (previous == 0).then_some(Duration::from_secs(60));
            state.bump(key, ttl, now);
            return Ok(None);
        }

        match write {
            CounterWrite::Increment { ttl } => state.bump(key, ttl, now),
            CounterWrite::Extend { ttl } => {
                if let Some(entry) = state.entries.get_mut(key) {
                    entry.expires_at = Some(now + ttl);
                }
            }
        }

        Ok(Some(CounterCommit { previous, write }))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.enter().await?;
        let mut state = self.lock();
        if state.fail_deletes {
            return Err(CacheError::Unavailable("delete rejected".to_string()));
        }
        state.entries.remove(key);
        Ok(())
    }

    async fn set_all_if_newer(
        &self,
        generation_key: &str,
        generation: u64,
        entries: &[(String, String)],
        ttl: Duration,
    ) -> Result<Option<Publish>, CacheError> {
        self.enter().await?;
        let now = Instant::now();
        let mut state = self.lock();
        state.purge(now);

        if state.conflicts > 0 {
            state.conflicts -= 1;
            return Ok(None);
        }

        let current = state
            .entries
            .get(generation_key)
            .and_then(|entry| entry.value.parse::<u64>().ok());
        if let Some(current) = current.filter(|current| *current >= generation) {
            return Ok(Some(Publish::Stale { current }));
        }

        let expires_at = Some(now + ttl);
        state.entries.insert(
            generation_key.to_string(),
            Entry {
                value: generation.to_string(),
                expires_at,
            },
        );
        for (key, value) in entries {
            state.entries.insert(
                key.clone(),
                Entry {
                    value: value.clone(),
                    expires_at,
                },
            );
        }
        Ok(Some(Publish::Written))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.enter().await?;
        Ok(self.value(key))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.enter().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn counter_expires_after_ttl() {
        let cache = MemoryCache::new();
        let commit = cache
            .update_counter("k", |_| CounterWrite::Increment {
                ttl: Some(Duration::from_secs(10)),
            })
            .await
            .expect("update");
        assert_eq!(commit.map(|c| c.previous), Some(0));
        assert_eq!(cache.value("k").as_deref(), Some("1"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.value("k"), None);
    }

    #[tokio::test]
    async fn injected_conflict_aborts_and_bumps() {
        let cache = MemoryCache::new();
        cache.inject_conflicts(1);
        let commit = cache
            .update_counter("k", |_| CounterWrite::Increment { ttl: None })
            .await
            .expect("update");
        assert_eq!(commit, None);
        assert_eq!(cache.value("k").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn older_generation_is_not_written() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        let newer = [("v".to_string(), "newer".to_string())];
        let older = [("v".to_string(), "older".to_string())];

        let publish = cache.set_all_if_newer("g", 2, &newer, ttl).await.expect("publish");
        assert_eq!(publish, Some(Publish::Written));
        let publish = cache.set_all_if_newer("g", 1, &older, ttl).await.expect("publish");
        assert_eq!(publish, Some(Publish::Stale { current: 2 }));

        assert_eq!(cache.value("v").as_deref(), Some("newer"));
        assert_eq!(cache.value("g").as_deref(), Some("2"));
    }
}
