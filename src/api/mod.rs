//! HTTP API.
//!
//! Identity comes from an upstream authenticator as `x-actor-*` headers; every route except
//! `/health` and `/metrics` requires it. Long-running work (package builds) is queued and
//! answered with `202 Accepted` and a job handle.

mod handlers;
mod middleware;

pub use middleware::{actor_middleware, ACTOR_ID_HEADER, ACTOR_ROLE_HEADER, FAMILY_ID_HEADER, SESSION_ID_HEADER};

use crate::error::WardenError;
use crate::jobs::JobQueue;
use crate::Warden;
use axum::{
    http::StatusCode,
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use handlers::*;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

/// Header carrying the step-up token on delete execution.
pub const STEP_UP_HEADER: &str = "x-step-up-token";

/// Shared state for API handlers.
#[derive(Clone)]
pub struct AppState {
    pub warden: Arc<Warden>,
    pub jobs: Arc<JobQueue>,
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(warden: Arc<Warden>, jobs: Arc<JobQueue>, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            warden,
            jobs,
            metrics,
        }
    }
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        // Evidence
        .route("/evidence", post(ingest_evidence))
        .route("/evidence/:evidence_id", get(get_evidence))
        .route("/evidence/:evidence_id/content", get(view_evidence))
        .route("/evidence/:evidence_id/custody", get(get_custody))
        // Packages and jobs
        .route("/families/:family_id/packages", post(create_package))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/cancel", post(cancel_job))
        // Policy and holds
        .route("/families/:family_id/policy", get(get_policy).put(put_policy))
        .route("/families/:family_id/legal-holds", get(list_holds).post(create_hold))
        .route("/legal-holds/:hold_id/release", post(release_hold))
        // Deletion governance
        .route("/delete-requests", post(create_delete_request))
        .route("/families/:family_id/delete-requests", get(list_delete_requests))
        .route("/delete-requests/:request_id", get(get_delete_request))
        .route("/delete-requests/:request_id/approve", post(approve_delete_request))
        .route("/delete-requests/:request_id/reject", post(reject_delete_request))
        .route("/delete-requests/:request_id/execute", post(execute_delete_request))
        // Step-up
        .route("/step-up", post(step_up))
        .route("/step-up/secret", put(enroll_step_up))
        // Keys
        .route("/signing-key", get(get_signing_key))
        .route("/signing-key/stage", post(stage_signing_key))
        .route("/signing-key/commit", post(commit_signing_key))
        .route("/devices", post(register_device))
        .route("/devices/:device_id/keys/stage", post(stage_device_key))
        .route("/devices/:device_id/keys/commit", post(commit_device_key))
        .route("/devices/:device_id/keys/staged", axum::routing::delete(discard_device_key))
        .route_layer(axum_middleware::from_fn(actor_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .merge(protected)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn render_metrics(axum::extract::State(state): axum::extract::State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// A [`WardenError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub WardenError);

impl From<WardenError> for ApiError {
    fn from(e: WardenError) -> Self {
        ApiError(e)
    }
}

/// Result type for handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// HTTP status for an error.
pub fn status_for(error: &WardenError) -> StatusCode {
    match error {
        WardenError::Validation(_) => StatusCode::BAD_REQUEST,
        WardenError::StepUpRequired | WardenError::StepUpInvalid(_) => StatusCode::UNAUTHORIZED,
        WardenError::Forbidden(_) | WardenError::PolicyViolation(_) => StatusCode::FORBIDDEN,
        WardenError::NotFound(_) => StatusCode::NOT_FOUND,
        WardenError::InvalidState(_) | WardenError::Conflict(_) | WardenError::NothingStaged(_) => {
            StatusCode::CONFLICT
        }
        WardenError::Integrity(_) | WardenError::DigestMismatch { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let message = if status.is_server_error() {
            error!(error = %self.0, "Request failed");
            "internal error".to_string()
        } else {
            if self.0.is_integrity() {
                warn!(error = %self.0, "Integrity failure surfaced to caller");
            }
            self.0.to_string()
        };

        (status, Json(json!({ "error": self.0.code(), "message": message }))).into_response()
    }
}
