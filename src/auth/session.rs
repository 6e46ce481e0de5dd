//! Session rows and the revoke-then-create rotation.
//!
//! One active session per principal is kept by deactivating every active row
//! and inserting the new one inside a single transaction. The principal's
//! `session_generation` is bumped first: the update locks the row so two
//! concurrent logins for the same principal rotate one after the other, and
//! the returned generation orders their token cache writes.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::future::Future;
use tracing::{Instrument, debug, info_span};
use uuid::Uuid;

use super::error::StoreError;

#[derive(Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    #[sqlx(rename = "user_id")]
    pub principal_id: Uuid,
    pub device: String,
    pub mac_address: String,
    pub public_key: String,
    pub active: bool,
    pub client_version: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A session about to be inserted. Always active.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NewSession {
    pub id: Uuid,
    pub principal_id: Uuid,
    pub device: String,
    pub mac_address: String,
    pub public_key: String,
    pub client_version: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub location: Option<String>,
}

/// Outcome of a committed rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rotation {
    pub deactivated: u64,
    /// Strictly increasing per principal, in commit order.
    pub generation: u64,
}

pub trait SessionStore: Send + Sync {
    /// Deactivate the principal's active sessions, then insert `session`, as
    /// one unit.
    fn rotate(
        &self,
        session: &NewSession,
    ) -> impl Future<Output = Result<Rotation, StoreError>> + Send;
}

#[derive(Clone, Debug)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All sessions of a principal, newest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn sessions_for(&self, principal_id: Uuid) -> Result<Vec<Session>, StoreError> {
        let query = r"
            SELECT id, user_id, device, mac_address, public_key, active, client_version,
                ip, user_agent, location, created_at, updated_at
            FROM sessions
            WHERE user_id = $1
            ORDER BY created_at DESC
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let sessions = sqlx::query_as::<_, Session>(query)
            .bind(principal_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await?;
        Ok(sessions)
    }
}

impl SessionStore for PgSessionStore {
    async fn rotate(&self, session: &NewSession) -> Result<Rotation, StoreError> {
        let mut tx = self.pool.begin().await?;

        let generation = next_generation(&mut tx, session.principal_id).await?;
        let deactivated = deactivate_all_active(&mut tx, session.principal_id).await?;
        create_session(&mut tx, session).await?;

        tx.commit().await?;

        debug!(
            principal_id = %session.principal_id,
            session_id = %session.id,
            deactivated,
            generation,
            "session rotated"
        );
        Ok(Rotation {
            deactivated,
            generation,
        })
    }
}

/// Bump and return the principal's session generation. Holds the row lock
/// until the transaction ends.
async fn next_generation(
    tx: &mut Transaction<'_, Postgres>,
    principal_id: Uuid,
) -> Result<u64, StoreError> {
    let query = r"
        UPDATE users
        SET session_generation = session_generation + 1
        WHERE id = $1
        RETURNING session_generation
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let generation: i64 = sqlx::query_scalar(query)
        .bind(principal_id)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await?;
    u64::try_from(generation)
        .map_err(|_| StoreError::Unavailable(format!("negative session generation {generation}")))
}

/// Bulk-deactivate every active session of `principal_id`. Rows are kept.
///
/// # Errors
/// Returns an error if the update fails.
pub async fn deactivate_all_active(
    tx: &mut Transaction<'_, Postgres>,
    principal_id: Uuid,
) -> Result<u64, sqlx::Error> {
    let query = r"
        UPDATE sessions
        SET active = FALSE, updated_at = NOW()
        WHERE user_id = $1 AND active = TRUE
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(principal_id)
        .execute(&mut **tx)
        .instrument(span)
        .await?;
    Ok(result.rows_affected())
}

/// Insert `session` as the active session.
///
/// # Errors
/// Returns an error if the insert fails.
pub async fn create_session(
    tx: &mut Transaction<'_, Postgres>,
    session: &NewSession,
) -> Result<(), sqlx::Error> {
    let query = r"
        INSERT INTO sessions
            (id, user_id, device, mac_address, public_key, active, client_version,
             ip, user_agent, location)
        VALUES ($1, $2, $3, $4, $5, TRUE, $6, $7, $8, $9)
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(session.id)
        .bind(session.principal_id)
        .bind(&session.device)
        .bind(&session.mac_address)
        .bind(&session.public_key)
        .bind(&session.client_version)
        .bind(&session.ip)
        .bind(&session.user_agent)
        .bind(&session.location)
        .execute(&mut **tx)
        .instrument(span)
        .await?;
    Ok(())
}
