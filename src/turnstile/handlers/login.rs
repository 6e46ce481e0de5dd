use axum::{
    Extension, Json,
    extract::rejection::JsonRejection,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::client_metadata;
use crate::auth::{
    AuthError, ErrorKind, ErrorResponse, LoginRequest, LoginResponse, LoginService,
    PrincipalDirectory, SessionStore,
};
use crate::cache::SharedCache;
use crate::turnstile::AppLoginService;

#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session created", body = LoginResponse),
        (status = 400, description = "Malformed request body", body = ErrorResponse),
        (status = 401, description = "Invalid or missing credentials", body = ErrorResponse),
        (status = 429, description = "Too many login attempts", body = ErrorResponse),
        (status = 500, description = "Storage or signing failure", body = ErrorResponse),
    ),
    tag = "auth"
)]
// axum handler for login
pub async fn login(
    headers: HeaderMap,
    service: Extension<Arc<AppLoginService>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    handle(headers, service, payload).await
}

/// Login handler for any set of collaborators.
pub async fn handle<D, S, C>(
    headers: HeaderMap,
    Extension(service): Extension<Arc<LoginService<D, S, C>>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Response
where
    D: PrincipalDirectory + 'static,
    S: SessionStore + 'static,
    C: SharedCache + Clone + 'static,
{
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return AuthError::new(ErrorKind::MalformedRequest, "LoginHandler", "parse_body")
                .with_context("detail", rejection.body_text())
                .into_response();
        }
    };

    let client = client_metadata(&headers);
    match service.login(&request, &client).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => err.into_response(),
    }
}
