use secrecy::SecretString;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u64 = 3;
pub const DEFAULT_ATTEMPT_WINDOW_SECONDS: u64 = 10;
pub const DEFAULT_LOCKOUT_SECONDS: u64 = 600;
pub const DEFAULT_CAS_MAX_RETRIES: u32 = 3;
pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: u64 = 900;
pub const DEFAULT_TOKEN_CACHE_TTL_SECONDS: u64 = 900;
pub const DEFAULT_IO_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_JWT_ISSUER: &str = "turnstile";

/// Login throttling thresholds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    max_attempts: u64,
    attempt_window: Duration,
    lockout: Duration,
    cas_max_retries: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_window: Duration::from_secs(DEFAULT_ATTEMPT_WINDOW_SECONDS),
            lockout: Duration::from_secs(DEFAULT_LOCKOUT_SECONDS),
            cas_max_retries: DEFAULT_CAS_MAX_RETRIES,
        }
    }
}

impl RateLimitConfig {
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u64) -> Self {
        self.max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_attempt_window(mut self, window: Duration) -> Self {
        self.attempt_window = window;
        self
    }

    #[must_use]
    pub fn with_lockout(mut self, lockout: Duration) -> Self {
        self.lockout = lockout;
        self
    }

    #[must_use]
    pub fn with_cas_max_retries(mut self, retries: u32) -> Self {
        self.cas_max_retries = retries;
        self
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u64 {
        self.max_attempts
    }

    #[must_use]
    pub const fn attempt_window(&self) -> Duration {
        self.attempt_window
    }

    #[must_use]
    pub const fn lockout(&self) -> Duration {
        self.lockout
    }

    #[must_use]
    pub const fn cas_max_retries(&self) -> u32 {
        self.cas_max_retries
    }
}

/// Immutable configuration for the login flow, built once at startup.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    jwt_secret: SecretString,
    jwt_issuer: String,
    access_token_ttl: Duration,
    token_cache_ttl: Duration,
    io_timeout: Duration,
    rate_limit: RateLimitConfig,
    pepper: Option<SecretString>,
}

impl AuthConfig {
    #[must_use]
    pub fn new(jwt_secret: SecretString) -> Self {
        Self {
            jwt_secret,
            jwt_issuer: DEFAULT_JWT_ISSUER.to_string(),
            access_token_ttl: Duration::from_secs(DEFAULT_ACCESS_TOKEN_TTL_SECONDS),
            token_cache_ttl: Duration::from_secs(DEFAULT_TOKEN_CACHE_TTL_SECONDS),
            io_timeout: Duration::from_millis(DEFAULT_IO_TIMEOUT_MS),
            rate_limit: RateLimitConfig::default(),
            pepper: None,
        }
    }

    #[must_use]
    pub fn with_jwt_issuer(mut self, issuer: String) -> Self {
        self.jwt_issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_access_token_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_token_cache_ttl(mut self, ttl: Duration) -> Self {
        self.token_cache_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    #[must_use]
    pub fn with_pepper(mut self, pepper: Option<SecretString>) -> Self {
        self.pepper = pepper;
        self
    }

    #[must_use]
    pub const fn jwt_secret(&self) -> &SecretString {
        &self.jwt_secret
    }

    #[must_use]
    pub fn jwt_issuer(&self) -> &str {
        &self.jwt_issuer
    }

    #[must_use]
    pub const fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    #[must_use]
    pub const fn token_cache_ttl(&self) -> Duration {
        self.token_cache_ttl
    }

    #[must_use]
    pub const fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    #[must_use]
    pub const fn rate_limit(&self) -> &RateLimitConfig {
        &self.rate_limit
    }

    #[must_use]
    pub const fn pepper(&self) -> Option<&SecretString> {
        self.pepper.as_ref()
    }
}
