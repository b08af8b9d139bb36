use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HealthError {
    #[error("health check failed for {target}: {reason}")]
    HealthCheckFailed { target: String, reason: String },
}

pub type HealthResult<T> = Result<T, HealthError>;
