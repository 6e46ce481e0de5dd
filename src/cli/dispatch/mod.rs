//! Maps validated CLI arguments to the action the binary runs.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_DSN, ARG_PORT, ARG_REDIS_URL, auth};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let redis_url = matches
        .get_one::<String>(ARG_REDIS_URL)
        .cloned()
        .context("missing required argument: --redis-url")?;

    let auth_opts = auth::Options::parse(matches)?;
    if auth_opts.login.lockout_seconds <= auth_opts.login.attempt_window_seconds {
        anyhow::bail!(
            "--{} ({}) must be longer than --{} ({})",
            auth::ARG_LOGIN_LOCKOUT_SECONDS,
            auth_opts.login.lockout_seconds,
            auth::ARG_LOGIN_ATTEMPT_WINDOW_SECONDS,
            auth_opts.login.attempt_window_seconds
        );
    }

    Ok(Action::Server(Args {
        port,
        dsn: SecretString::from(dsn),
        redis_url: SecretString::from(redis_url),
        jwt_secret: SecretString::from(auth_opts.jwt_secret),
        jwt_issuer: auth_opts.jwt_issuer,
        access_token_ttl_seconds: auth_opts.access_token_ttl_seconds,
        token_cache_ttl_seconds: auth_opts.token_cache_ttl_seconds,
        login_max_attempts: auth_opts.login.max_attempts,
        login_attempt_window_seconds: auth_opts.login.attempt_window_seconds,
        login_lockout_seconds: auth_opts.login.lockout_seconds,
        login_cas_max_retries: auth_opts.login.cas_max_retries,
        io_timeout_ms: auth_opts.io_timeout_ms,
        password_pepper: auth_opts.password_pepper.map(SecretString::from),
    }))
}
