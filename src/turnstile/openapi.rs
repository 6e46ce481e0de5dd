use super::handlers::{health, login};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Routes that are both served and documented.
pub(crate) fn api_router() -> OpenApiRouter {
    OpenApiRouter::with_openapi(base_document())
        .routes(routes!(health::health))
        .routes(routes!(login::login))
}

fn base_document() -> utoipa::openapi::OpenApi {
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(Some(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    // Cargo authors look like "Name <email>"; only the first one is used.
    let author = env!("CARGO_PKG_AUTHORS").split(':').next().unwrap_or_default();
    let (name, email) = match author.split_once('<') {
        Some((name, rest)) => (name.trim(), rest.trim_end_matches('>').trim()),
        None => (author.trim(), ""),
    };
    if !name.is_empty() || !email.is_empty() {
        let mut contact = Contact::new();
        contact.name = (!name.is_empty()).then(|| name.to_string());
        contact.email = (!email.is_empty()).then(|| email.to_string());
        info.contact = Some(contact);
    }

    let mut license = License::new(env!("CARGO_PKG_LICENSE"));
    license.identifier = Some(env!("CARGO_PKG_LICENSE").to_string());
    info.license = Some(license);

    let mut auth = Tag::new("auth");
    auth.description = Some("Login and session issuance".to_string());
    let mut health = Tag::new("health");
    health.description = Some("Dependency status".to_string());

    OpenApiBuilder::new()
        .info(info)
        .tags(Some(vec![auth, health]))
        .build()
}
