//! Actor extraction from upstream identity headers.

use crate::auth::{Actor, Role};
use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::debug;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const SESSION_ID_HEADER: &str = "x-session-id";
pub const FAMILY_ID_HEADER: &str = "x-family-id";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Build the actor described by the identity headers.
pub(crate) fn actor_from_headers(headers: &HeaderMap) -> std::result::Result<Actor, String> {
    let id = header(headers, ACTOR_ID_HEADER).ok_or("missing x-actor-id")?;
    let role: Role = header(headers, ACTOR_ROLE_HEADER)
        .ok_or("missing x-actor-role")?
        .parse()?;

    Ok(Actor {
        id: id.to_string(),
        role,
        session_id: header(headers, SESSION_ID_HEADER).map(str::to_string),
        family_id: header(headers, FAMILY_ID_HEADER).map(str::to_string),
    })
}

/// Resolve the [`Actor`] and store it in the request extensions. Missing identity is a 401.
pub async fn actor_middleware(mut request: Request, next: Next) -> Response {
    match actor_from_headers(request.headers()) {
        Ok(actor) => {
            request.extensions_mut().insert(actor);
            next.run(request).await
        }
        Err(reason) => {
            debug!(reason = %reason, "Rejected request without identity");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "unauthenticated", "message": reason })),
            )
                .into_response()
        }
    }
}
