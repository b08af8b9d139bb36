use thiserror::Error;

use flipgate_provision::ProvisionError;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("unknown target pool: {0}")]
    UnknownPool(String),

    #[error("target pool {0} already exists")]
    DuplicatePool(String),

    #[error("no listener on port {0}")]
    UnknownListener(u16),

    #[error("port {0} already has a listener")]
    PortInUse(u16),

    #[error("listener on port {port} cannot forward to {pool}: {reason}")]
    InvalidTarget { port: u16, pool: String, reason: String },

    #[error("membership of {pool} changed: expected revision {expected}, found {actual}")]
    RevisionConflict { pool: String, expected: u64, actual: u64 },

    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

pub type RouterResult<T> = Result<T, RouterError>;
