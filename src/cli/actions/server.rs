use crate::auth::{AuthConfig, RateLimitConfig};
use crate::cli::telemetry;
use crate::turnstile;
use anyhow::Result;
use secrecy::SecretString;
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: SecretString,
    pub redis_url: SecretString,
    pub jwt_secret: SecretString,
    pub jwt_issuer: String,
    pub access_token_ttl_seconds: u64,
    pub token_cache_ttl_seconds: u64,
    pub login_max_attempts: u64,
    pub login_attempt_window_seconds: u64,
    pub login_lockout_seconds: u64,
    pub login_cas_max_retries: u32,
    pub io_timeout_ms: u64,
    pub password_pepper: Option<SecretString>,
}

impl Args {
    #[must_use]
    pub fn auth_config(&self) -> AuthConfig {
        let rate_limit = RateLimitConfig::default()
            .with_max_attempts(self.login_max_attempts)
            .with_attempt_window(Duration::from_secs(self.login_attempt_window_seconds))
            .with_lockout(Duration::from_secs(self.login_lockout_seconds))
            .with_cas_max_retries(self.login_cas_max_retries);

        AuthConfig::new(self.jwt_secret.clone())
            .with_jwt_issuer(self.jwt_issuer.clone())
            .with_access_token_ttl(Duration::from_secs(self.access_token_ttl_seconds))
            .with_token_cache_ttl(Duration::from_secs(self.token_cache_ttl_seconds))
            .with_io_timeout(Duration::from_millis(self.io_timeout_ms))
            .with_rate_limit(rate_limit)
            .with_pepper(self.password_pepper.clone())
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the server fails to start or exits with an error.
pub async fn execute(args: Args) -> Result<()> {
    let auth_config = args.auth_config();
    debug!(
        issuer = auth_config.jwt_issuer(),
        max_attempts = auth_config.rate_limit().max_attempts(),
        "starting server"
    );

    let result = turnstile::new(args.port, args.dsn, args.redis_url, auth_config).await;
    telemetry::shutdown_tracer();
    result
}
