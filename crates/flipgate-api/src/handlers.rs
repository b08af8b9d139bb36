//! REST API handlers.
//!
//! Each handler calls into the `ReleaseOrchestrator` or reads the built
//! `Topology` and returns JSON in the `{success, data, error}` envelope.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::{info, warn};

use flipgate_core::ImageRef;
use flipgate_release::ReleaseError;
use flipgate_state::ReleasePhase;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn status_for(err: &ReleaseError) -> StatusCode {
    match err {
        ReleaseError::UnknownService(_) | ReleaseError::UnknownRelease(_) => StatusCode::NOT_FOUND,
        ReleaseError::ReleaseInProgress { .. } | ReleaseError::InvalidState { .. } => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn release_error(err: ReleaseError) -> axum::response::Response {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!(error = %err, "release request failed");
    }
    error_response(&err.to_string(), status).into_response()
}

// ── Releases ───────────────────────────────────────────────────

/// Submit request body.
#[derive(serde::Deserialize)]
pub struct SubmitReleaseRequest {
    /// `repository:tag`
    pub image: String,
}

/// POST /api/v1/services/:service/releases
pub async fn submit_release(
    State(state): State<ApiState>,
    Path(service): Path<String>,
    Json(req): Json<SubmitReleaseRequest>,
) -> impl IntoResponse {
    let image = match ImageRef::parse(&req.image) {
        Ok(image) => image,
        Err(e) => return error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response(),
    };
    match state.releases.submit_release(&service, image) {
        Ok(handle) => {
            info!(release = %handle.id, %service, "release accepted");
            (StatusCode::ACCEPTED, ApiResponse::ok(handle)).into_response()
        }
        Err(e) => release_error(e),
    }
}

/// GET /api/v1/services/:service/releases
pub async fn list_releases(
    State(state): State<ApiState>,
    Path(service): Path<String>,
) -> impl IntoResponse {
    match state.releases.list_releases(&service) {
        Ok(records) => ApiResponse::ok(records).into_response(),
        Err(e) => release_error(e),
    }
}

/// GET /api/v1/releases/:id
pub async fn get_release(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.releases.get_release_status(&id) {
        Ok(record) => ApiResponse::ok(record).into_response(),
        Err(e) => release_error(e),
    }
}

// ── Operator controls ──────────────────────────────────────────

#[derive(serde::Serialize)]
struct CommandOutcome {
    release: String,
    phase: ReleasePhase,
}

fn outcome(state: &ApiState, id: String) -> axum::response::Response {
    match state.releases.get_release_status(&id) {
        Ok(record) => ApiResponse::ok(CommandOutcome {
            release: id,
            phase: record.phase,
        })
        .into_response(),
        Err(e) => release_error(e),
    }
}

/// POST /api/v1/releases/:id/approve
pub async fn approve_release(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.releases.approve_release(&id).await {
        Ok(()) => outcome(&state, id),
        Err(e) => release_error(e),
    }
}

/// POST /api/v1/releases/:id/rollback
pub async fn rollback_release(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.releases.rollback_release(&id).await {
        Ok(()) => outcome(&state, id),
        Err(e) => release_error(e),
    }
}

// ── Topology ───────────────────────────────────────────────────

/// GET /api/v1/topology
pub async fn get_topology(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.topology.summary())
}
