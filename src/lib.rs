//! # Turnstile (login admission and session issuance)
//!
//! `turnstile` authenticates a principal by password or by a federated SSO
//! identity, throttles login attempts per identity label, rotates the
//! principal's active session, and issues a short-lived access token together
//! with an opaque refresh handle.
//!
//! ## Login flow
//!
//! 1. **Admission:** a per-label attempt counter in Redis is checked and bumped
//!    inside a `WATCH`/`MULTI`/`EXEC` transaction. Once the counter reaches the
//!    configured maximum every further attempt re-arms the lockout TTL.
//! 2. **Identity:** principals are looked up by the SHA-512 hash of the email
//!    or by the platform-scoped SSO id. Lookup misses and password mismatches
//!    produce the same outward error.
//! 3. **Session rotation:** all active sessions of the principal are
//!    deactivated and the new session is inserted in one Postgres transaction.
//! 4. **Tokens:** an HS256 access token is minted and cached in both directions
//!    (principal to token, token to principal); the attempt counter is cleared.
//!
//! Storage faults anywhere before token issuance fail the request closed.

pub mod auth;
pub mod cache;
pub mod cli;
pub mod turnstile;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
