//! Login admission, credential checks, session rotation and token issuance.

pub mod config;
pub mod credentials;
pub mod error;
pub mod identity;
pub mod rate_limit;
pub mod service;
pub mod session;
pub mod token;
pub mod user_agent;

#[cfg(test)]
pub(crate) mod test_support;

pub use self::config::{AuthConfig, RateLimitConfig};
pub use self::credentials::{Argon2Verifier, PasswordVerifier};
pub use self::error::{AuthError, ErrorKind, ErrorResponse, StoreError};
pub use self::identity::{PgDirectory, Principal, PrincipalDirectory, SsoPlatform};
pub use self::rate_limit::{Admission, RateLimiter};
pub use self::service::{ClientMetadata, LoginRequest, LoginResponse, LoginService};
pub use self::session::{PgSessionStore, SessionStore};
pub use self::token::{Claims, TokenIssuer};
pub use self::user_agent::{UserAgentParser, WootheeUserAgentParser};
