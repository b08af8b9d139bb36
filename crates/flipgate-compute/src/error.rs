use thiserror::Error;

use flipgate_core::ReferenceError;
use flipgate_provision::ProvisionError;
use flipgate_router::RouterError;

#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("invalid placement: {0}")]
    InvalidPlacement(String),

    #[error("invalid scaling bounds: min {min} > max {max}")]
    InvalidScaling { min: u32, max: u32 },

    #[error("unknown compute pool: {0}")]
    UnknownPool(String),

    #[error("registration into {pool} kept conflicting after {attempts} attempts")]
    RegistrationConflict { pool: String, attempts: u32 },

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

pub type ComputeResult<T> = Result<T, ComputeError>;
