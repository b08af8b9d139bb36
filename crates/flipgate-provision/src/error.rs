//! Provisioning error types.

use thiserror::Error;

/// Errors surfaced by the provisioner.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("backend rejected {name}: {reason}")]
    Rejected { name: String, reason: String },

    #[error("provisioning timeout for {name} after {attempts} attempts")]
    Timeout { name: String, attempts: u32 },

    #[error("resource {0} entered failed state")]
    ResourceFailed(String),

    #[error("unknown resource handle: {0}")]
    UnknownHandle(String),

    #[error("state store error: {0}")]
    State(#[from] flipgate_state::StateError),
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Errors from building or walking a dependency graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("node {0} declared twice")]
    DuplicateNode(String),

    #[error("node {node} depends on undeclared {dependency}")]
    UnknownDependency { node: String, dependency: String },

    #[error("dependency cycle involving {0}")]
    Cycle(String),

    #[error("node {node} is not ready: dependency {dependency} has not reported ready")]
    DependencyNotReady { node: String, dependency: String },

    #[error("unknown node: {0}")]
    UnknownNode(String),
}
