use crate::auth::{
    Argon2Verifier, AuthConfig, LoginService, PgDirectory, PgSessionStore,
    WootheeUserAgentParser,
};
use crate::cache::RedisCache;
use anyhow::{Context, Result};
use axum::{
    Extension, Json,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::get,
};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;

pub(crate) mod handlers;
mod openapi;

pub use openapi::openapi;

/// The login service wired to Postgres and Redis.
pub type AppLoginService = LoginService<PgDirectory, PgSessionStore, RedisCache>;

const POOL_MAX_CONNECTIONS: u32 = 10;
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(2 * 60 * 60);

/// Start the server
/// # Errors
/// Return error if a backing store is unreachable or the listener cannot bind
pub async fn new(
    port: u16,
    dsn: SecretString,
    redis_url: SecretString,
    auth_config: AuthConfig,
) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(POOL_MAX_CONNECTIONS)
        .max_lifetime(POOL_MAX_LIFETIME)
        .test_before_acquire(true)
        .connect(dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;

    let cache = RedisCache::connect(redis_url.expose_secret())
        .await
        .context("Failed to connect to redis")?;

    let verifier = Argon2Verifier::new(auth_config.pepper().cloned())
        .context("Failed to initialize password verifier")?;

    let check_timeout = handlers::health::CheckTimeout(auth_config.io_timeout());

    let service: Arc<AppLoginService> = Arc::new(LoginService::new(
        PgDirectory::new(pool.clone()),
        PgSessionStore::new(pool.clone()),
        cache.clone(),
        &auth_config,
        Arc::new(verifier),
        Arc::new(WootheeUserAgentParser),
    ));

    let (router, api_doc) = openapi::api_router().split_for_parts();
    let app = router
        .route(
            "/api-docs/openapi.json",
            get(move || async move { Json(api_doc) }),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(service))
                .layer(Extension(check_timeout))
                .layer(Extension(cache))
                .layer(Extension(pool)),
        );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
