//! The login orchestrator.
//!
//! `Start -> AdmissionChecked -> IdentityResolved -> CredentialVerified ->
//! SessionRotated -> TokenIssued`, each step exiting with an [`AuthError`] on
//! failure. Nothing done before a failure is compensated: a rotated session
//! stays rotated if token caching fails afterwards.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Span, debug, field, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::config::AuthConfig;
use super::credentials::{Credential, PasswordVerifier, select_credential};
use super::error::{AuthError, storage_call};
use super::identity::{Principal, PrincipalDirectory, SsoPlatform, hash_email};
use super::rate_limit::{Admission, RateLimiter, rate_limit_label};
use super::session::{NewSession, SessionStore};
use super::token::TokenIssuer;
use super::user_agent::{UserAgentParser, describe};
use crate::cache::SharedCache;

#[derive(ToSchema, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub sso_id: Option<String>,
    pub sso_platform: Option<SsoPlatform>,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub mac_address: String,
    #[serde(default)]
    pub public_key: String,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("has_email", &self.email.is_some())
            .field("has_password", &self.password.is_some())
            .field("sso_platform", &self.sso_platform)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

/// Transport-level facts about the caller, stored on the session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientMetadata {
    pub ip: Option<String>,
    pub user_agent: String,
    pub location: Option<String>,
    pub client_version: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LoginResponse {
    pub session_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
}

pub struct LoginService<D, S, C> {
    directory: D,
    sessions: S,
    limiter: RateLimiter<C>,
    tokens: TokenIssuer<C>,
    verifier: Arc<dyn PasswordVerifier>,
    user_agents: Arc<dyn UserAgentParser>,
    io_timeout: Duration,
}

impl<D, S, C> LoginService<D, S, C>
where
    D: PrincipalDirectory,
    S: SessionStore,
    C: SharedCache + Clone,
{
    pub fn new(
        directory: D,
        sessions: S,
        cache: C,
        config: &AuthConfig,
        verifier: Arc<dyn PasswordVerifier>,
        user_agents: Arc<dyn UserAgentParser>,
    ) -> Self {
        Self {
            directory,
            sessions,
            limiter: RateLimiter::new(
                cache.clone(),
                config.rate_limit().clone(),
                config.io_timeout(),
            ),
            tokens: TokenIssuer::new(cache, config),
            verifier,
            user_agents,
            io_timeout: config.io_timeout(),
        }
    }

    #[must_use]
    pub const fn tokens(&self) -> &TokenIssuer<C> {
        &self.tokens
    }

    /// Run one login attempt end to end.
    ///
    /// # Errors
    /// See [`super::error::ErrorKind`] for the outward failure kinds.
    #[instrument(skip_all, fields(label = field::Empty, principal_id = field::Empty))]
    pub async fn login(
        &self,
        request: &LoginRequest,
        client: &ClientMetadata,
    ) -> Result<LoginResponse, AuthError> {
        let label = rate_limit_label(request.email.as_deref(), request.sso_id.as_deref());
        Span::current().record("label", label.as_str());

        match self.limiter.check_admission(&label).await? {
            Admission::Denied { retry_after } => {
                return Err(AuthError::admission_denied(retry_after).with_context("label", label));
            }
            Admission::Allowed { attempts } => debug!(attempts, "login admitted"),
        }

        let credential = select_credential(request)?;
        let principal = self.authenticate(credential).await?;
        Span::current().record("principal_id", field::display(principal.id));

        let session = NewSession {
            id: Uuid::new_v4(),
            principal_id: principal.id,
            device: request.device.clone(),
            mac_address: request.mac_address.clone(),
            public_key: request.public_key.clone(),
            client_version: client.client_version.clone(),
            ip: client.ip.clone(),
            user_agent: Some(describe(
                self.user_agents.as_ref(),
                &client.user_agent,
                &label,
            )),
            location: client.location.clone(),
        };
        let rotation = storage_call(
            self.io_timeout,
            "SessionStore",
            "rotate",
            self.sessions.rotate(&session),
        )
        .await?;

        let tokens = self
            .tokens
            .issue(&principal, session.id, rotation.generation)
            .await?;

        if let Err(err) = self.limiter.reset(&label).await {
            warn!(error = %err, "failed to reset login rate limit");
        }

        info!(
            session_id = %session.id,
            deactivated = rotation.deactivated,
            generation = rotation.generation,
            "login succeeded"
        );

        Ok(LoginResponse {
            session_id: session.id,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        })
    }

    async fn authenticate(&self, credential: Credential<'_>) -> Result<Principal, AuthError> {
        match credential {
            Credential::Sso { sso_id, platform } => {
                let principal = storage_call(
                    self.io_timeout,
                    "PrincipalDirectory",
                    "find_by_sso",
                    self.directory.find_by_sso(sso_id, platform),
                )
                .await?
                .filter(|p| !p.is_deleted);
                principal.ok_or_else(|| {
                    AuthError::invalid_credentials("resolve_by_sso")
                        .with_context("platform", platform.as_str())
                })
            }
            Credential::Password { email, password } => {
                let email_hash = hash_email(email);
                let principal = storage_call(
                    self.io_timeout,
                    "PrincipalDirectory",
                    "find_by_email_hash",
                    self.directory.find_by_email_hash(&email_hash),
                )
                .await?
                .filter(|p| !p.is_deleted);

                let Some(principal) = principal else {
                    let _ = self.check_password(password, None).await;
                    return Err(AuthError::invalid_credentials("resolve_by_email")
                        .with_context("email_hash", email_hash));
                };

                self.check_password(password, principal.password_hash.clone())
                    .await
                    .map_err(|err| err.with_context("principal_id", principal.id.to_string()))?;
                Ok(principal)
            }
        }
    }

    /// Verify off the async runtime. A missing hash runs the decoy and fails.
    async fn check_password(&self, password: &str, hash: Option<String>) -> Result<(), AuthError> {
        let verifier = Arc::clone(&self.verifier);
        let password = password.to_string();
        let has_hash = hash.is_some();

        let outcome = tokio::task::spawn_blocking(move || match hash {
            Some(hash) => verifier.verify(&password, &hash),
            None => {
                verifier.verify_decoy(&password);
                Ok(false)
            }
        })
        .await;

        match outcome {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) if has_hash => Err(AuthError::invalid_credentials("verify_password")),
            Ok(Ok(false)) => Err(AuthError::invalid_credentials("verify_password.no_hash")),
            Ok(Err(err)) => {
                Err(AuthError::invalid_credentials("verify_password.malformed_hash")
                    .with_source(err))
            }
            Err(err) => Err(AuthError::invalid_credentials("verify_password.join").with_source(err)),
        }
    }
}
