//! Credential selection and password verification.

use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHash, PasswordHasher};
use secrecy::{ExposeSecret, SecretString};

use super::error::{AuthError, ErrorKind};
use super::identity::SsoPlatform;
use super::service::LoginRequest;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("invalid hash format: {0}")]
    MalformedHash(String),

    #[error("hashing failed: {0}")]
    Hashing(String),
}

/// Black-box check of a presented secret against a stored hash.
pub trait PasswordVerifier: Send + Sync {
    /// `Ok(true)` on match, `Ok(false)` on mismatch.
    ///
    /// # Errors
    /// Returns an error when the stored hash cannot be parsed.
    fn verify(&self, password: &str, hash: &str) -> Result<bool, CredentialError>;

    /// Spend the same work as [`PasswordVerifier::verify`] without a real
    /// hash, so a missing principal costs as much as a wrong password.
    fn verify_decoy(&self, password: &str);
}

/// Argon2id verifier with an optional pepper prepended to the password.
pub struct Argon2Verifier {
    pepper: Option<SecretString>,
    decoy_hash: String,
}

impl std::fmt::Debug for Argon2Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Argon2Verifier")
            .field("peppered", &self.pepper.is_some())
            .finish_non_exhaustive()
    }
}

impl Argon2Verifier {
    /// # Errors
    /// Returns an error if the decoy hash cannot be computed.
    pub fn new(pepper: Option<SecretString>) -> Result<Self, CredentialError> {
        let decoy_hash = hash_with(pepper.as_ref(), "turnstile-decoy-password")?;
        Ok(Self { pepper, decoy_hash })
    }

    /// Hash `password` the way [`Argon2Verifier::verify`] expects it.
    ///
    /// # Errors
    /// Returns an error if hashing fails.
    pub fn hash_password(&self, password: &str) -> Result<String, CredentialError> {
        hash_with(self.pepper.as_ref(), password)
    }

    fn peppered(&self, password: &str) -> String {
        peppered(self.pepper.as_ref(), password)
    }
}

fn peppered(pepper: Option<&SecretString>, password: &str) -> String {
    match pepper {
        Some(pepper) => format!("{}{password}", pepper.expose_secret()),
        None => password.to_string(),
    }
}

fn hash_with(pepper: Option<&SecretString>, password: &str) -> Result<String, CredentialError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(peppered(pepper, password).as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CredentialError::Hashing(e.to_string()))
}

impl PasswordVerifier for Argon2Verifier {
    fn verify(&self, password: &str, hash: &str) -> Result<bool, CredentialError> {
        let parsed =
            PasswordHash::new(hash).map_err(|e| CredentialError::MalformedHash(e.to_string()))?;
        match argon2::PasswordVerifier::verify_password(
            &Argon2::default(),
            self.peppered(password).as_bytes(),
            &parsed,
        ) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(CredentialError::MalformedHash(e.to_string())),
        }
    }

    fn verify_decoy(&self, password: &str) {
        let _ = self.verify(password, &self.decoy_hash);
    }
}

/// The credential a login request authenticates with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Credential<'a> {
    Password { email: &'a str, password: &'a str },
    Sso { sso_id: &'a str, platform: SsoPlatform },
}

/// Pick the credential to use. A non-blank SSO id wins over an email.
///
/// # Errors
/// - `MalformedRequest` for an SSO id without a platform.
/// - `MissingCredential` when neither an SSO id nor a password is present.
/// - `InvalidCredentials` for a password without an email.
pub fn select_credential(request: &LoginRequest) -> Result<Credential<'_>, AuthError> {
    if let Some(sso_id) = non_blank(request.sso_id.as_deref()) {
        let platform = request.sso_platform.ok_or_else(|| {
            AuthError::new(ErrorKind::MalformedRequest, "LoginService", "select_credential")
                .with_context("reason", "sso_id without sso_platform")
        })?;
        return Ok(Credential::Sso { sso_id, platform });
    }

    let Some(password) = request.password.as_deref().filter(|p| !p.is_empty()) else {
        return Err(AuthError::new(
            ErrorKind::MissingCredential,
            "LoginService",
            "select_credential",
        ));
    };

    let email = non_blank(request.email.as_deref())
        .ok_or_else(|| AuthError::invalid_credentials("select_credential"))?;

    Ok(Credential::Password { email, password })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
