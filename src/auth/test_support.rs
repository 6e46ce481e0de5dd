//! In-memory collaborators and Postgres helpers for tests.

use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::error::StoreError;
use super::identity::{Principal, PrincipalDirectory, SsoPlatform, hash_email};
use super::session::{NewSession, Rotation, SessionStore};

pub(crate) fn principal(email: &str, password_hash: Option<String>) -> Principal {
    let now = Utc::now();
    Principal {
        id: Uuid::new_v4(),
        first_name: "Alice".to_string(),
        last_name: "Liddell".to_string(),
        email_hash: Some(hash_email(email)),
        phone_number_hash: None,
        password_hash,
        google_sso_id: None,
        apple_sso_id: None,
        facebook_sso_id: None,
        investor_type: Some("INDIVIDUAL".to_string()),
        role: "INVESTOR".to_string(),
        is_deleted: false,
        created_at: now,
        updated_at: now,
    }
}

#[derive(Clone, Default)]
pub(crate) struct MemoryDirectory {
    principals: Arc<Mutex<Vec<Principal>>>,
    lookups: Arc<AtomicUsize>,
}

impl MemoryDirectory {
    pub(crate) fn new(principals: Vec<Principal>) -> Self {
        Self {
            principals: Arc::new(Mutex::new(principals)),
            lookups: Arc::default(),
        }
    }

    pub(crate) fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn find(&self, matches: impl Fn(&Principal) -> bool) -> Option<Principal> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.principals
            .lock()
            .expect("directory poisoned")
            .iter()
            .find(|p| !p.is_deleted && matches(p))
            .cloned()
    }
}

impl PrincipalDirectory for MemoryDirectory {
    async fn find_by_email_hash(&self, email_hash: &str) -> Result<Option<Principal>, StoreError> {
        Ok(self.find(|p| p.email_hash.as_deref() == Some(email_hash)))
    }

    async fn find_by_sso(
        &self,
        sso_id: &str,
        platform: SsoPlatform,
    ) -> Result<Option<Principal>, StoreError> {
        Ok(self.find(|p| {
            let column = match platform {
                SsoPlatform::Google => &p.google_sso_id,
                SsoPlatform::Apple => &p.apple_sso_id,
                SsoPlatform::Facebook => &p.facebook_sso_id,
            };
            column.as_deref() == Some(sso_id)
        }))
    }
}

#[derive(Clone, Debug)]
pub(crate) struct StoredSession {
    pub(crate) session: NewSession,
    pub(crate) active: bool,
}

#[derive(Clone, Default)]
pub(crate) struct MemorySessionStore {
    rows: Arc<Mutex<Vec<StoredSession>>>,
    offline: Arc<Mutex<bool>>,
}

impl MemorySessionStore {
    pub(crate) fn set_offline(&self, offline: bool) {
        *self.offline.lock().expect("store poisoned") = offline;
    }

    pub(crate) fn sessions_for(&self, principal_id: Uuid) -> Vec<StoredSession> {
        self.rows
            .lock()
            .expect("store poisoned")
            .iter()
            .filter(|row| row.session.principal_id == principal_id)
            .cloned()
            .collect()
    }

    pub(crate) fn count(&self) -> usize {
        self.rows.lock().expect("store poisoned").len()
    }
}

impl SessionStore for MemorySessionStore {
    async fn rotate(&self, session: &NewSession) -> Result<Rotation, StoreError> {
        if *self.offline.lock().expect("store poisoned") {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        let mut rows = self.rows.lock().expect("store poisoned");
        let mut deactivated = 0;
        for row in rows
            .iter_mut()
            .filter(|row| row.session.principal_id == session.principal_id && row.active)
        {
            row.active = false;
            deactivated += 1;
        }
        rows.push(StoredSession {
            session: session.clone(),
            active: true,
        });
        // One row per rotation, so the row count is the generation.
        let generation = rows
            .iter()
            .filter(|row| row.session.principal_id == session.principal_id)
            .count();
        Ok(Rotation {
            deactivated,
            generation: u64::try_from(generation).expect("generation fits u64"),
        })
    }
}

/// Postgres-backed helpers. Tests using them skip unless
/// `TURNSTILE_TEST_DSN` points at a disposable database.
pub(crate) mod pg {
    use sqlx::{PgPool, postgres::PgPoolOptions};
    use tokio::sync::OnceCell;
    use uuid::Uuid;

    const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/db/sql/schema.sql"));

    static SCHEMA: OnceCell<()> = OnceCell::const_new();

    pub(crate) async fn pool() -> Option<PgPool> {
        let Ok(dsn) = std::env::var("TURNSTILE_TEST_DSN") else {
            eprintln!("Skipping integration test: TURNSTILE_TEST_DSN is not set");
            return None;
        };
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&dsn)
            .await
            .expect("failed to connect test pool");

        SCHEMA
            .get_or_init(|| async {
                for statement in split_sql_statements(SCHEMA_SQL) {
                    sqlx::query(&statement)
                        .execute(&pool)
                        .await
                        .expect("failed to apply schema");
                }
            })
            .await;

        Some(pool)
    }

    pub(crate) fn split_sql_statements(sql: &str) -> Vec<String> {
        let without_comments: String = sql
            .lines()
            .filter(|line| !line.trim_start().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        without_comments
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect()
    }

    /// Insert a fresh principal and return its id.
    pub(crate) async fn insert_principal(
        pool: &PgPool,
        email_hash: Option<&str>,
        google_sso_id: Option<&str>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            r"INSERT INTO users (id, first_name, last_name, email_hash, google_sso_id, role)
            VALUES ($1, 'Test', 'Principal', $2, $3, 'INVESTOR')",
        )
        .bind(id)
        .bind(email_hash)
        .bind(google_sso_id)
        .execute(pool)
        .await
        .expect("failed to insert principal");
        id
    }
}
