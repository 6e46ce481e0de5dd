//! Per-identity login throttling on top of [`SharedCache::update_counter`].
//!
//! The counter for a label opens a short attempt window on its first hit. Once
//! it reaches `max_attempts`, every further attempt is refused and pushes the
//! expiry out to the (longer) lockout duration, so hammering a locked label
//! keeps it locked. The label comes straight from the request body; an
//! attacker can lock out someone else's email, and that is accepted.

use std::time::Duration;
use tracing::{debug, warn};

use super::config::RateLimitConfig;
use super::error::{AuthError, storage_call};
use crate::cache::{CounterWrite, SharedCache};

pub const UNKNOWN_LABEL: &str = "unknown";

const COUNTER_PREFIX: &str = "rate-limit:login:";

/// First non-blank of the presented email and SSO id, else [`UNKNOWN_LABEL`].
///
/// Emails are trimmed and lowercased so case variants share one bucket; SSO
/// ids are opaque and only trimmed.
#[must_use]
pub fn rate_limit_label(email: Option<&str>, sso_id: Option<&str>) -> String {
    if let Some(email) = email.map(str::trim).filter(|e| !e.is_empty()) {
        return email.to_lowercase();
    }
    if let Some(sso_id) = sso_id.map(str::trim).filter(|s| !s.is_empty()) {
        return sso_id.to_string();
    }
    UNKNOWN_LABEL.to_string()
}

#[must_use]
pub fn counter_key(label: &str) -> String {
    format!("{COUNTER_PREFIX}{label}")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// `attempts` is the count after this attempt was recorded.
    Allowed { attempts: u64 },
    Denied { retry_after: Duration },
}

/// Write to commit for a counter currently at `current`.
#[must_use]
pub fn decide(config: &RateLimitConfig, current: u64) -> CounterWrite {
    if current >= config.max_attempts() {
        CounterWrite::Extend {
            ttl: config.lockout(),
        }
    } else {
        CounterWrite::Increment {
            ttl: (current == 0).then_some(config.attempt_window()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RateLimiter<C> {
    cache: C,
    config: RateLimitConfig,
    io_timeout: Duration,
}

impl<C: SharedCache> RateLimiter<C> {
    pub fn new(cache: C, config: RateLimitConfig, io_timeout: Duration) -> Self {
        Self {
            cache,
            config,
            io_timeout,
        }
    }

    /// Record an attempt for `label` and decide whether it may proceed.
    ///
    /// A commit aborted by a concurrent writer is retried from the read, up to
    /// `cas_max_retries` times.
    ///
    /// # Errors
    /// `StorageFault` on cache errors, timeouts or exhausted retries. A denied
    /// attempt is `Ok(Admission::Denied)`, not an error.
    pub async fn check_admission(&self, label: &str) -> Result<Admission, AuthError> {
        let key = counter_key(label);
        let attempts = self.config.cas_max_retries().saturating_add(1);

        for round in 0..attempts {
            let config = &self.config;
            let commit = storage_call(
                self.io_timeout,
                "RateLimiter",
                "check_admission",
                self.cache.update_counter(&key, |current| decide(config, current)),
            )
            .await?;

            let Some(commit) = commit else {
                debug!(round, "rate limit counter changed under watch, retrying");
                continue;
            };

            return Ok(match commit.write {
                CounterWrite::Extend { ttl } => Admission::Denied { retry_after: ttl },
                CounterWrite::Increment { .. } => Admission::Allowed {
                    attempts: commit.previous + 1,
                },
            });
        }

        warn!(attempts, "rate limit counter contention, giving up");
        Err(AuthError::storage("RateLimiter", "check_admission")
            .with_context("reason", "contention")
            .with_context("attempts", attempts.to_string()))
    }

    /// Drop the counter for `label`.
    ///
    /// # Errors
    /// `StorageFault` when the delete fails or times out.
    pub async fn reset(&self, label: &str) -> Result<(), AuthError> {
        storage_call(
            self.io_timeout,
            "RateLimiter",
            "reset",
            self.cache.delete(&counter_key(label)),
        )
        .await
    }
}
