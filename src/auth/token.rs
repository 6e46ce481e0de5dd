//! Access and refresh token issuance, plus the two-way access token cache.
//!
//! Cache writes carry the session generation returned by the rotation, so a
//! login whose rotation committed first can never overwrite the token of a
//! later one, however the two requests interleave afterwards.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{RngCore, rngs::OsRng};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::config::AuthConfig;
use super::error::{AuthError, ErrorKind, storage_call};
use super::identity::Principal;
use crate::cache::{Publish, SharedCache};

const ACCESS_TOKEN_PREFIX: &str = "token:access:";
const TOKEN_OWNER_PREFIX: &str = "token:user:";
const TOKEN_GENERATION_PREFIX: &str = "token:generation:";

/// Principal id to its current access token.
#[must_use]
pub fn access_token_key(principal_id: Uuid) -> String {
    format!("{ACCESS_TOKEN_PREFIX}{principal_id}")
}

/// Access token to the principal it was issued for.
#[must_use]
pub fn token_owner_key(token: &str) -> String {
    format!("{TOKEN_OWNER_PREFIX}{token}")
}

/// Principal id to the session generation of its cached token.
#[must_use]
pub fn token_generation_key(principal_id: Uuid) -> String {
    format!("{TOKEN_GENERATION_PREFIX}{principal_id}")
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub user_type: String,
    pub investor_type: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub session_id: Uuid,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone, PartialEq, Eq)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for IssuedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedTokens").finish_non_exhaustive()
    }
}

/// 32 random bytes, base64url without padding.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate_refresh_token() -> Result<String, rand::Error> {
    let mut bytes = [0u8; 32];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

pub struct TokenIssuer<C> {
    cache: C,
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    access_token_ttl: Duration,
    token_cache_ttl: Duration,
    io_timeout: Duration,
    cas_max_retries: u32,
}

impl<C> std::fmt::Debug for TokenIssuer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.issuer)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("token_cache_ttl", &self.token_cache_ttl)
            .finish_non_exhaustive()
    }
}

impl<C: SharedCache> TokenIssuer<C> {
    pub fn new(cache: C, config: &AuthConfig) -> Self {
        let secret = config.jwt_secret().expose_secret().as_bytes();
        Self {
            cache,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: config.jwt_issuer().to_string(),
            access_token_ttl: config.access_token_ttl(),
            token_cache_ttl: config.token_cache_ttl(),
            io_timeout: config.io_timeout(),
            cas_max_retries: config.rate_limit().cas_max_retries(),
        }
    }

    /// Mint the token pair for `principal` and cache the access token both
    /// ways. The cache horizon is independent of the token's `exp`.
    ///
    /// `generation` is the one the session rotation returned; the write is
    /// refused when a later rotation already cached its token.
    ///
    /// # Errors
    /// `SigningFault` if minting fails, `StorageFault` if the cache write
    /// fails or was superseded. A token that cannot be resolved through the
    /// cache is never returned.
    pub async fn issue(
        &self,
        principal: &Principal,
        session_id: Uuid,
        generation: u64,
    ) -> Result<IssuedTokens, AuthError> {
        let access_token = self.mint(principal, session_id)?;
        let refresh_token = generate_refresh_token().map_err(|e| {
            AuthError::new(ErrorKind::SigningFault, "TokenIssuer", "refresh_token").with_source(e)
        })?;

        let entries = [
            (access_token_key(principal.id), access_token.clone()),
            (token_owner_key(&access_token), principal.id.to_string()),
        ];
        self.publish(principal.id, generation, &entries).await?;

        debug!(principal_id = %principal.id, %session_id, generation, "access token issued");

        Ok(IssuedTokens {
            access_token,
            refresh_token,
        })
    }

    async fn publish(
        &self,
        principal_id: Uuid,
        generation: u64,
        entries: &[(String, String)],
    ) -> Result<(), AuthError> {
        let generation_key = token_generation_key(principal_id);
        let attempts = self.cas_max_retries.saturating_add(1);

        for round in 0..attempts {
            let publish = storage_call(
                self.io_timeout,
                "TokenIssuer",
                "cache_access_token",
                self.cache.set_all_if_newer(
                    &generation_key,
                    generation,
                    entries,
                    self.token_cache_ttl,
                ),
            )
            .await?;

            match publish {
                Some(Publish::Written) => return Ok(()),
                Some(Publish::Stale { current }) => {
                    warn!(%principal_id, generation, current, "newer session already cached");
                    return Err(AuthError::storage("TokenIssuer", "cache_access_token.superseded")
                        .with_context("reason", "superseded")
                        .with_context("generation", generation.to_string())
                        .with_context("current", current.to_string()));
                }
                None => debug!(round, "token generation changed under watch, retrying"),
            }
        }

        warn!(attempts, "token cache contention, giving up");
        Err(AuthError::storage("TokenIssuer", "cache_access_token")
            .with_context("reason", "contention")
            .with_context("attempts", attempts.to_string()))
    }

    /// Sign an HS256 access token.
    ///
    /// # Errors
    /// `SigningFault` if encoding fails.
    pub fn mint(&self, principal: &Principal, session_id: Uuid) -> Result<String, AuthError> {
        let iat = Utc::now().timestamp();
        let ttl = i64::try_from(self.access_token_ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            user_id: principal.id,
            user_type: principal.role.clone(),
            investor_type: principal.investor_type.clone(),
            first_name: principal.first_name.clone(),
            last_name: principal.last_name.clone(),
            session_id,
            iss: self.issuer.clone(),
            iat,
            exp: iat.saturating_add(ttl),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(
            |e| AuthError::new(ErrorKind::SigningFault, "TokenIssuer", "mint").with_source(e),
        )
    }

    /// Resolve an access token to its claims.
    ///
    /// The token must verify (signature, issuer, expiry), the reverse cache
    /// entry must name the same principal, and it must still be that
    /// principal's current token.
    ///
    /// # Errors
    /// `InvalidCredentials` for any mismatch, `StorageFault` on cache errors.
    pub async fn authenticate(&self, token: &str) -> Result<Claims, AuthError> {
        let rejected =
            |location| AuthError::new(ErrorKind::InvalidCredentials, "TokenIssuer", location);

        let owner = storage_call(
            self.io_timeout,
            "TokenIssuer",
            "authenticate",
            self.cache.get(&token_owner_key(token)),
        )
        .await?
        .ok_or_else(|| rejected("authenticate.not_cached"))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        let claims = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| rejected("authenticate.decode").with_source(e))?
            .claims;

        if owner != claims.user_id.to_string() {
            return Err(rejected("authenticate.owner_mismatch"));
        }

        let current = storage_call(
            self.io_timeout,
            "TokenIssuer",
            "authenticate",
            self.cache.get(&access_token_key(claims.user_id)),
        )
        .await?;
        if current.as_deref() != Some(token) {
            return Err(rejected("authenticate.superseded"));
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::principal;
    use crate::cache::memory::MemoryCache;
    use secrecy::SecretString;

    fn issuer(cache: &MemoryCache) -> TokenIssuer<MemoryCache> {
        let config = AuthConfig::new(SecretString::from("test-secret"))
            .with_access_token_ttl(Duration::from_secs(900))
            .with_token_cache_ttl(Duration::from_secs(300));
        TokenIssuer::new(cache.clone(), &config)
    }

    #[test]
    fn refresh_tokens_are_unique_and_url_safe() {
        let a = generate_refresh_token().expect("token");
        let b = generate_refresh_token().expect("token");
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(
            a.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[tokio::test(start_paused = true)]
    async fn issue_caches_both_directions() {
        let cache = MemoryCache::new();
        let issuer = issuer(&cache);
        let principal = principal("alice@example.com", None);
        let session_id = Uuid::new_v4();

        let tokens = issuer.issue(&principal, session_id, 1).await.expect("issue");

        assert_eq!(
            cache.value(&access_token_key(principal.id)).as_deref(),
            Some(tokens.access_token.as_str())
        );
        assert_eq!(
            cache.value(&token_owner_key(&tokens.access_token)),
            Some(principal.id.to_string())
        );
        assert_eq!(
            cache.ttl(&token_owner_key(&tokens.access_token)),
            Some(Duration::from_secs(300))
        );
        assert_eq!(
            cache.ttl(&access_token_key(principal.id)),
            Some(Duration::from_secs(300))
        );
        assert_eq!(cache.value(&token_generation_key(principal.id)).as_deref(), Some("1"));

        let claims = issuer
            .authenticate(&tokens.access_token)
            .await
            .expect("authenticate");
        assert_eq!(claims.user_id, principal.id);
        assert_eq!(claims.session_id, session_id);
        assert_eq!(claims.iss, "turnstile");
        assert_eq!(claims.exp - claims.iat, 900);
    }

    #[tokio::test]
    async fn cache_failure_is_storage_fault() {
        let cache = MemoryCache::new();
        let issuer = issuer(&cache);
        cache.set_offline(true);
        let err = issuer
            .issue(&principal("alice@example.com", None), Uuid::new_v4(), 1)
            .await
            .expect_err("offline");
        assert_eq!(err.kind(), ErrorKind::StorageFault);
    }

    #[tokio::test]
    async fn uncached_token_is_rejected() {
        let cache = MemoryCache::new();
        let issuer = issuer(&cache);
        let token = issuer
            .mint(&principal("alice@example.com", None), Uuid::new_v4())
            .expect("mint");
        let err = issuer.authenticate(&token).await.expect_err("not cached");
        assert_eq!(err.kind(), ErrorKind::InvalidCredentials);
    }

    #[tokio::test]
    async fn superseded_token_is_rejected() {
        let cache = MemoryCache::new();
        let issuer = issuer(&cache);
        let principal = principal("alice@example.com", None);

        let first = issuer.issue(&principal, Uuid::new_v4(), 1).await.expect("issue");
        let second = issuer.issue(&principal, Uuid::new_v4(), 2).await.expect("issue");

        let err = issuer
            .authenticate(&first.access_token)
            .await
            .expect_err("superseded");
        assert_eq!(err.location(), "authenticate.superseded");
        issuer
            .authenticate(&second.access_token)
            .await
            .expect("current token");
    }

    #[tokio::test]
    async fn earlier_rotation_cannot_overwrite_later_token() {
        let cache = MemoryCache::new();
        let issuer = issuer(&cache);
        let principal = principal("alice@example.com", None);

        // Rotation 2 caches its token before the slower rotation 1 gets there.
        let later = issuer.issue(&principal, Uuid::new_v4(), 2).await.expect("issue");
        let err = issuer
            .issue(&principal, Uuid::new_v4(), 1)
            .await
            .expect_err("older generation");
        assert_eq!(err.kind(), ErrorKind::StorageFault);
        assert_eq!(err.location(), "cache_access_token.superseded");
        assert_eq!(err.context("current"), Some("2"));

        let claims = issuer
            .authenticate(&later.access_token)
            .await
            .expect("later token stays current");
        assert_eq!(claims.user_id, principal.id);
    }

    #[tokio::test]
    async fn contended_publish_retries_then_gives_up() {
        let cache = MemoryCache::new();
        let issuer = issuer(&cache);
        let principal = principal("alice@example.com", None);

        cache.inject_conflicts(2);
        issuer.issue(&principal, Uuid::new_v4(), 1).await.expect("retried");

        cache.inject_conflicts(10);
        let err = issuer
            .issue(&principal, Uuid::new_v4(), 2)
            .await
            .expect_err("contention");
        assert_eq!(err.context("reason"), Some("contention"));
        assert_eq!(err.context("attempts"), Some("4"));
    }

    #[tokio::test]
    async fn foreign_signature_is_rejected() {
        let cache = MemoryCache::new();
        let issuer = issuer(&cache);
        let principal = principal("alice@example.com", None);

        let other = TokenIssuer::new(
            cache.clone(),
            &AuthConfig::new(SecretString::from("other-secret")),
        );
        let forged = other.mint(&principal, Uuid::new_v4()).expect("mint");
        cache.insert(
            &token_owner_key(&forged),
            &principal.id.to_string(),
            Duration::from_secs(60),
        );
        cache.insert(
            &access_token_key(principal.id),
            &forged,
            Duration::from_secs(60),
        );

        let err = issuer.authenticate(&forged).await.expect_err("forged");
        assert_eq!(err.location(), "authenticate.decode");
    }
}
