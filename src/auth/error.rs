//! Login error taxonomy.
//!
//! Every failure leaving the login flow is an [`AuthError`]: a fixed
//! [`ErrorKind`] plus internal context (scope, location, key/value fields and
//! an optional source). Only the kind reaches the caller; the context is for
//! logs. That keeps "unknown email" and "wrong password" byte-identical on the
//! wire while the logs still say which step failed.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info};
use utoipa::ToSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AdmissionDenied,
    InvalidCredentials,
    MissingCredential,
    MalformedRequest,
    StorageFault,
    SigningFault,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::AdmissionDenied => "auth/too-many-attempts",
            Self::InvalidCredentials => "auth/invalid-credentials",
            Self::MissingCredential => "auth/no-credential",
            Self::MalformedRequest => "auth/malformed-request",
            Self::StorageFault => "internal/storage-fault",
            Self::SigningFault => "internal/signing-fault",
        }
    }

    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::AdmissionDenied => "too many login attempts, try again later",
            Self::InvalidCredentials => "invalid email or password",
            Self::MissingCredential => "no credential supplied",
            Self::MalformedRequest => "invalid request body",
            Self::StorageFault | Self::SigningFault => "an unexpected error occurred",
        }
    }

    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::AdmissionDenied => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidCredentials | Self::MissingCredential => StatusCode::UNAUTHORIZED,
            Self::MalformedRequest => StatusCode::BAD_REQUEST,
            Self::StorageFault | Self::SigningFault => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{} at {scope}/{location}", .kind.code())]
pub struct AuthError {
    kind: ErrorKind,
    scope: &'static str,
    location: &'static str,
    retry_after: Option<Duration>,
    context: BTreeMap<&'static str, String>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl AuthError {
    #[must_use]
    pub fn new(kind: ErrorKind, scope: &'static str, location: &'static str) -> Self {
        Self {
            kind,
            scope,
            location,
            retry_after: None,
            context: BTreeMap::new(),
            source: None,
        }
    }

    #[must_use]
    pub fn admission_denied(retry_after: Duration) -> Self {
        let mut err = Self::new(ErrorKind::AdmissionDenied, "RateLimiter", "check_admission");
        err.retry_after = Some(retry_after);
        err
    }

    #[must_use]
    pub fn invalid_credentials(location: &'static str) -> Self {
        Self::new(ErrorKind::InvalidCredentials, "LoginService", location)
    }

    #[must_use]
    pub fn storage(scope: &'static str, location: &'static str) -> Self {
        Self::new(ErrorKind::StorageFault, scope, location)
    }

    #[must_use]
    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.insert(key, value.into());
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub const fn location(&self) -> &'static str {
        self.location
    }

    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    #[must_use]
    pub fn context(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }

    /// The caller-facing body. Depends on the kind only.
    #[must_use]
    pub fn body(&self) -> ErrorResponse {
        ErrorResponse {
            error: ErrorBody {
                code: self.kind.code().to_string(),
                message: self.kind.message().to_string(),
                status_code: self.kind.status().as_u16(),
            },
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub status_code: u16,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.kind.status();
        let source = self.source.as_ref().map(ToString::to_string);
        if status.is_server_error() {
            error!(
                scope = self.scope,
                location = self.location,
                context = ?self.context,
                source = ?source,
                "{}",
                self.kind.code()
            );
        } else {
            info!(
                scope = self.scope,
                location = self.location,
                context = ?self.context,
                "{}",
                self.kind.code()
            );
        }

        let mut response = (status, Json(self.body())).into_response();
        if let Some(retry_after) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Faults raised by the relational collaborators.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Run a cache or database call under `limit`.
///
/// Both the collaborator's own error and an elapsed deadline become a
/// `StorageFault` tagged with `scope`/`location`.
pub(crate) async fn storage_call<T, E, F>(
    limit: Duration,
    scope: &'static str,
    location: &'static str,
    call: F,
) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, E>>,
    E: StdError + Send + Sync + 'static,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(AuthError::storage(scope, location).with_source(err)),
        Err(_) => Err(AuthError::storage(scope, location)
            .with_context("timeout_ms", limit.as_millis().to_string())),
    }
}
