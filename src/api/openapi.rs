use super::handlers::{auth, health};
use axum::{middleware, Router};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI spec.
    let (_router, openapi) = api_router();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated `OpenAPI` spec. Session-management routes go
/// in the protected group, which runs behind the auth gateway. Routes added
/// outside (like `/`) are intentionally not documented.
pub(crate) fn api_router() -> (Router, utoipa::openapi::OpenApi) {
    // `routes!` reads #[utoipa::path] to bind HTTP method + path and add the
    // route to OpenAPI.
    let public = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(auth::registration::initiate))
        .routes(routes!(auth::registration::send_email_otp))
        .routes(routes!(auth::registration::verify_email_otp))
        .routes(routes!(auth::registration::send_phone_otp))
        .routes(routes!(auth::registration::verify_phone_otp))
        .routes(routes!(auth::registration::finalize))
        .routes(routes!(auth::login::login))
        .routes(routes!(auth::session::refresh));

    let protected = OpenApiRouter::new()
        .routes(routes!(auth::session::logout))
        .routes(routes!(auth::session::logout_all))
        .routes(routes!(auth::session::logout_others))
        .routes(routes!(auth::session::list_sessions))
        .routes(routes!(auth::session::delete_session));

    let (public_router, mut openapi) = public.split_for_parts();
    let (protected_router, protected_openapi) = protected.split_for_parts();
    openapi.merge(protected_openapi);

    let mut registration_tag = Tag::new("registration");
    registration_tag.description =
        Some("Two-channel verified signup with ephemeral drafts".to_string());

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Password login".to_string());

    let mut sessions_tag = Tag::new("sessions");
    sessions_tag.description = Some("Token refresh, revocation, and device listing".to_string());

    openapi.tags = Some(vec![registration_tag, auth_tag, sessions_tag]);

    let router = public_router.merge(
        protected_router.route_layer(middleware::from_fn(auth::gateway::require_auth)),
    );
    (router, openapi)
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    if let Some(start) = author.find('<') {
        let name = author[..start].trim();
        let email = author[start + 1..].trim_end_matches('>').trim();
        let name = if name.is_empty() { None } else { Some(name) };
        let email = if email.is_empty() { None } else { Some(email) };
        (name, email)
    } else {
        let name = author.trim();
        (if name.is_empty() { None } else { Some(name) }, None)
    }
}
