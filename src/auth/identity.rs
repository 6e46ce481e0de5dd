//! Principal lookup by hashed email or by platform-scoped SSO id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use sqlx::PgPool;
use std::fmt;
use std::future::Future;
use tracing::{Instrument, info_span};
use utoipa::ToSchema;
use uuid::Uuid;

use super::error::StoreError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum SsoPlatform {
    Google,
    Apple,
    Facebook,
}

impl SsoPlatform {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Google => "GOOGLE",
            Self::Apple => "APPLE",
            Self::Facebook => "FACEBOOK",
        }
    }
}

impl fmt::Display for SsoPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, sqlx::FromRow)]
pub struct Principal {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email_hash: Option<String>,
    pub phone_number_hash: Option<String>,
    pub password_hash: Option<String>,
    pub google_sso_id: Option<String>,
    pub apple_sso_id: Option<String>,
    pub facebook_sso_id: Option<String>,
    pub investor_type: Option<String>,
    pub role: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Keep hashes out of logs.
impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("is_deleted", &self.is_deleted)
            .finish_non_exhaustive()
    }
}

#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Hex SHA-512 of the normalized email; the only form emails are stored in.
#[must_use]
pub fn hash_email(email: &str) -> String {
    let digest = Sha512::digest(normalize_email(email).as_bytes());
    hex::encode(digest)
}

/// Read-only access to principals. Soft-deleted rows are never returned.
pub trait PrincipalDirectory: Send + Sync {
    fn find_by_email_hash(
        &self,
        email_hash: &str,
    ) -> impl Future<Output = Result<Option<Principal>, StoreError>> + Send;

    fn find_by_sso(
        &self,
        sso_id: &str,
        platform: SsoPlatform,
    ) -> impl Future<Output = Result<Option<Principal>, StoreError>> + Send;
}

macro_rules! select_principal {
    ($filter:literal) => {
        concat!(
            r"SELECT id, first_name, last_name, email_hash, phone_number_hash, password_hash,
                google_sso_id, apple_sso_id, facebook_sso_id, investor_type, role,
                is_deleted, created_at, updated_at
            FROM users
            WHERE ",
            $filter,
            " AND is_deleted = FALSE"
        )
    };
}

#[derive(Clone, Debug)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, query: &'static str, value: &str) -> Result<Option<Principal>, StoreError> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let principal = sqlx::query_as::<_, Principal>(query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(principal)
    }
}

impl PrincipalDirectory for PgDirectory {
    async fn find_by_email_hash(&self, email_hash: &str) -> Result<Option<Principal>, StoreError> {
        self.fetch(select_principal!("email_hash = $1"), email_hash)
            .await
    }

    async fn find_by_sso(
        &self,
        sso_id: &str,
        platform: SsoPlatform,
    ) -> Result<Option<Principal>, StoreError> {
        let query = match platform {
            SsoPlatform::Google => select_principal!("google_sso_id = $1"),
            SsoPlatform::Apple => select_principal!("apple_sso_id = $1"),
            SsoPlatform::Facebook => select_principal!("facebook_sso_id = $1"),
        };
        self.fetch(query, sso_id).await
    }
}
