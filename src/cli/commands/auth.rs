use clap::{Arg, ArgMatches, Command};

use crate::auth::config::{
    DEFAULT_ACCESS_TOKEN_TTL_SECONDS, DEFAULT_ATTEMPT_WINDOW_SECONDS, DEFAULT_CAS_MAX_RETRIES,
    DEFAULT_IO_TIMEOUT_MS, DEFAULT_JWT_ISSUER, DEFAULT_LOCKOUT_SECONDS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_TOKEN_CACHE_TTL_SECONDS,
};

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_JWT_ISSUER: &str = "jwt-issuer";
pub const ARG_ACCESS_TOKEN_TTL_SECONDS: &str = "access-token-ttl-seconds";
pub const ARG_TOKEN_CACHE_TTL_SECONDS: &str = "token-cache-ttl-seconds";
pub const ARG_LOGIN_MAX_ATTEMPTS: &str = "login-max-attempts";
pub const ARG_LOGIN_ATTEMPT_WINDOW_SECONDS: &str = "login-attempt-window-seconds";
pub const ARG_LOGIN_LOCKOUT_SECONDS: &str = "login-lockout-seconds";
pub const ARG_LOGIN_CAS_MAX_RETRIES: &str = "login-cas-max-retries";
pub const ARG_IO_TIMEOUT_MS: &str = "io-timeout-ms";
pub const ARG_PASSWORD_PEPPER: &str = "password-pepper";

#[derive(Debug)]
pub struct Options {
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub access_token_ttl_seconds: u64,
    pub token_cache_ttl_seconds: u64,
    pub login: LoginLimits,
    pub io_timeout_ms: u64,
    pub password_pepper: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginLimits {
    pub max_attempts: u64,
    pub attempt_window_seconds: u64,
    pub lockout_seconds: u64,
    pub cas_max_retries: u32,
}

impl Options {
    /// Parse token and login throttling arguments.
    ///
    /// # Errors
    /// Returns an error if the signing secret is missing or blank.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let jwt_secret = match matches.get_one::<String>(ARG_JWT_SECRET) {
            Some(value) if !value.trim().is_empty() => value.clone(),
            _ => anyhow::bail!("missing required argument: --{ARG_JWT_SECRET}"),
        };

        let number = |id: &str, default: u64| matches.get_one::<u64>(id).copied().unwrap_or(default);

        Ok(Self {
            jwt_secret,
            jwt_issuer: matches
                .get_one::<String>(ARG_JWT_ISSUER)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_JWT_ISSUER.to_string()),
            access_token_ttl_seconds: number(
                ARG_ACCESS_TOKEN_TTL_SECONDS,
                DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            ),
            token_cache_ttl_seconds: number(
                ARG_TOKEN_CACHE_TTL_SECONDS,
                DEFAULT_TOKEN_CACHE_TTL_SECONDS,
            ),
            login: LoginLimits {
                max_attempts: number(ARG_LOGIN_MAX_ATTEMPTS, DEFAULT_MAX_ATTEMPTS),
                attempt_window_seconds: number(
                    ARG_LOGIN_ATTEMPT_WINDOW_SECONDS,
                    DEFAULT_ATTEMPT_WINDOW_SECONDS,
                ),
                lockout_seconds: number(ARG_LOGIN_LOCKOUT_SECONDS, DEFAULT_LOCKOUT_SECONDS),
                cas_max_retries: matches
                    .get_one::<u32>(ARG_LOGIN_CAS_MAX_RETRIES)
                    .copied()
                    .unwrap_or(DEFAULT_CAS_MAX_RETRIES),
            },
            io_timeout_ms: number(ARG_IO_TIMEOUT_MS, DEFAULT_IO_TIMEOUT_MS),
            password_pepper: matches
                .get_one::<String>(ARG_PASSWORD_PEPPER)
                .cloned()
                .filter(|v| !v.is_empty()),
        })
    }
}

pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    let command = with_login_args(command);
    command.arg(
        Arg::new(ARG_PASSWORD_PEPPER)
            .long(ARG_PASSWORD_PEPPER)
            .help("Secret pepper mixed into password hashes")
            .env("TURNSTILE_PASSWORD_PEPPER")
            .hide_env_values(true),
    )
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HMAC secret used to sign access tokens")
                .env("TURNSTILE_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_JWT_ISSUER)
                .long(ARG_JWT_ISSUER)
                .help("Issuer claim of access tokens")
                .env("TURNSTILE_JWT_ISSUER")
                .default_value(DEFAULT_JWT_ISSUER),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .long(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .help("Access token lifetime in seconds")
                .env("TURNSTILE_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_TOKEN_CACHE_TTL_SECONDS)
                .long(ARG_TOKEN_CACHE_TTL_SECONDS)
                .help("Lifetime of cached token entries in seconds")
                .env("TURNSTILE_TOKEN_CACHE_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

fn with_login_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOGIN_MAX_ATTEMPTS)
                .long(ARG_LOGIN_MAX_ATTEMPTS)
                .help("Failed attempts allowed per identity before lockout")
                .env("TURNSTILE_LOGIN_MAX_ATTEMPTS")
                .default_value("3")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOGIN_ATTEMPT_WINDOW_SECONDS)
                .long(ARG_LOGIN_ATTEMPT_WINDOW_SECONDS)
                .help("Window in seconds in which attempts are counted")
                .env("TURNSTILE_LOGIN_ATTEMPT_WINDOW_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOGIN_LOCKOUT_SECONDS)
                .long(ARG_LOGIN_LOCKOUT_SECONDS)
                .help("Lockout duration in seconds once the limit is reached")
                .env("TURNSTILE_LOGIN_LOCKOUT_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOGIN_CAS_MAX_RETRIES)
                .long(ARG_LOGIN_CAS_MAX_RETRIES)
                .help("Retries of an optimistic cache transaction that lost a race")
                .env("TURNSTILE_LOGIN_CAS_MAX_RETRIES")
                .default_value("3")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_IO_TIMEOUT_MS)
                .long(ARG_IO_TIMEOUT_MS)
                .help("Deadline in milliseconds for each cache or database call")
                .env("TURNSTILE_IO_TIMEOUT_MS")
                .default_value("2000")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
