use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool};
use std::future::Future;
use std::time::Duration;
use tracing::{Instrument, debug, error, info_span};
use utoipa::ToSchema;

use crate::GIT_COMMIT_HASH;
use crate::cache::{RedisCache, SharedCache};

/// Upper bound for each dependency check, the same I/O timeout the login
/// flow uses.
#[derive(Clone, Copy, Debug)]
pub struct CheckTimeout(pub Duration);

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    name: String,
    version: String,
    build: String,
    database: String,
    cache: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Database and cache are reachable", body = Health),
        (status = 503, description = "Database or cache is unreachable", body = Health),
    ),
    tag = "health"
)]
// axum handler for health
pub async fn health(
    pool: Extension<PgPool>,
    cache: Extension<RedisCache>,
    timeout: Extension<CheckTimeout>,
) -> impl IntoResponse {
    let limit = timeout.0.0;

    let database = check_within(limit, "database", async {
        let mut conn = pool.0.acquire().await?;
        let span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping().instrument(span).await
    })
    .await;

    let cache_status = check_within(limit, "cache", cache.0.ping()).await;

    let health = Health {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        build: GIT_COMMIT_HASH.to_string(),
        database: status_label(database).to_string(),
        cache: status_label(cache_status).to_string(),
    };

    let headers = x_app_headers(&health.build);

    if database && cache_status {
        debug!("database and cache are healthy");
        (StatusCode::OK, headers, Json(health))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, Json(health))
    }
}

/// Run a dependency check under `limit`. Errors and timeouts are logged and
/// reported as unhealthy.
async fn check_within<T, E, F>(limit: Duration, what: &str, check: F) -> bool
where
    E: std::fmt::Display,
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, check).await {
        Ok(Ok(_)) => true,
        Ok(Err(err)) => {
            error!("Failed to ping {}: {}", what, err);
            false
        }
        Err(_) => {
            error!("Timed out pinging {} after {:?}", what, limit);
            false
        }
    }
}

const fn status_label(ok: bool) -> &'static str {
    if ok { "ok" } else { "error" }
}

/// `X-App: name:version:short-hash`. Empty map if the value is not a valid header.
fn x_app_headers(commit: &str) -> HeaderMap {
    let short_hash = commit.get(..7).filter(|_| commit.len() > 7).unwrap_or("");
    let mut headers = HeaderMap::new();
    match format!(
        "{}:{}:{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_hash
    )
    .parse::<HeaderValue>()
    {
        Ok(value) => {
            headers.insert("X-App", value);
        }
        Err(err) => error!("Failed to parse X-App header: {}", err),
    }
    headers
}
