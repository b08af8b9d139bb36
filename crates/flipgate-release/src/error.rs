use thiserror::Error;

use flipgate_compute::ComputeError;
use flipgate_health::HealthError;
use flipgate_router::RouterError;
use flipgate_state::{ReleasePhase, StateError};

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("service {service} already has release {active} in progress")]
    ReleaseInProgress { service: String, active: String },

    #[error("release {release} is {phase}; cannot {action}")]
    InvalidState {
        release: String,
        phase: ReleasePhase,
        action: &'static str,
    },

    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("unknown release: {0}")]
    UnknownRelease(String),

    #[error("rollback of {release} failed: {reason}")]
    RollbackFailed { release: String, reason: String },

    #[error(transparent)]
    HealthCheckFailed(#[from] HealthError),

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    State(#[from] StateError),
}

pub type ReleaseResult<T> = Result<T, ReleaseError>;
