//! Network validation errors, raised while the topology is built.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("address space {space} cannot hold the subnet plan: {reason}")]
    AllocationConflict { space: String, reason: String },

    #[error("exactly 2 availability zones are supported, got {0}")]
    UnsupportedZoneCount(usize),

    #[error("no rule lets {from} reach {to} on port {port}")]
    UnreachableTarget { from: String, to: String, port: u16 },

    #[error("invalid route association for {target}: {reason}")]
    InvalidRouteAssociation { target: String, reason: String },

    #[error("boundary {0} declared twice")]
    DuplicateBoundary(String),

    #[error("boundary {0} has not been declared")]
    UnknownBoundary(String),

    #[error("security graph is sealed; rules can no longer change")]
    GraphSealed,
}

pub type NetworkResult<T> = Result<T, NetworkError>;
