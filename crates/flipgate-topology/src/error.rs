use thiserror::Error;

use flipgate_compute::ComputeError;
use flipgate_network::NetworkError;
use flipgate_provision::{GraphError, ProvisionError};
use flipgate_router::RouterError;

use crate::stage::BuildStage;

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("invalid topology configuration: {0}")]
    Config(String),

    #[error("stage {0} ran before its inputs were built")]
    MissingInput(BuildStage),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Compute(#[from] ComputeError),
}

pub type TopologyResult<T> = Result<T, TopologyError>;
