use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use ecf_core::{TenantId, UserId};

use crate::app::errors::json_error;
use crate::context::{ActorContext, TenantContext};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const USER_HEADER: &str = "x-user-id";

/// Resolve tenant and actor from request headers.
///
/// `x-tenant-id` is required; `x-user-id` is optional here and demanded by
/// the handlers that record who acted.
pub async fn context_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let tenant_id: TenantId = match header(req.headers(), TENANT_HEADER) {
        Some(raw) => match raw.parse() {
            Ok(id) => id,
            Err(_) => return bad_request("invalid_tenant", "x-tenant-id must be a UUID"),
        },
        None => return bad_request("missing_tenant", "x-tenant-id header is required"),
    };

    let actor = match header(req.headers(), USER_HEADER) {
        Some(raw) => match raw.parse::<UserId>() {
            Ok(id) => Some(ActorContext::new(id)),
            Err(_) => return bad_request("invalid_user", "x-user-id must be a UUID"),
        },
        None => None,
    };

    req.extensions_mut().insert(TenantContext::new(tenant_id));
    if let Some(actor) = actor {
        req.extensions_mut().insert(actor);
    }

    next.run(req).await
}

fn bad_request(code: &'static str, message: &'static str) -> Response {
    json_error(StatusCode::BAD_REQUEST, code, message)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
