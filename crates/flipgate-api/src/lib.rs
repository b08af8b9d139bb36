//! flipgate-api — REST API for Flipgate.
//!
//! Axum route handlers for submitting releases, reading their status,
//! operator approval and rollback, and inspecting the built topology.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/services/{service}/releases` | Submit a release |
//! | GET | `/api/v1/services/{service}/releases` | Release history of a service |
//! | GET | `/api/v1/releases/{id}` | Release status |
//! | POST | `/api/v1/releases/{id}/approve` | End the bake early |
//! | POST | `/api/v1/releases/{id}/rollback` | Revert to the previous color |
//! | GET | `/api/v1/topology` | Subnets, security edges, routers |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use flipgate_release::ReleaseOrchestrator;
use flipgate_topology::Topology;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub releases: ReleaseOrchestrator,
    pub topology: Arc<Topology>,
}

/// Build the API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route(
            "/services/{service}/releases",
            get(handlers::list_releases).post(handlers::submit_release),
        )
        .route("/releases/{id}", get(handlers::get_release))
        .route("/releases/{id}/approve", post(handlers::approve_release))
        .route("/releases/{id}/rollback", post(handlers::rollback_release))
        .route("/topology", get(handlers::get_topology))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
