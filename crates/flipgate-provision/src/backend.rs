//! The provisioning backend contract.
//!
//! Concrete transports (a cloud control API, a template deployer) live
//! outside Flipgate. All they must offer is idempotent creation keyed by
//! a caller-supplied token, updates, and status reads.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use flipgate_core::ResourceKind;
use flipgate_state::ResourceStatus;

/// Backend-assigned identity of a created resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    pub id: String,
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Idempotency key for a backend call. Retrying with the same token never
/// creates a second resource or applies an update twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestToken(String);

impl RequestToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors a backend may return.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Throttling, eventual-consistency lag, network blips. Retryable.
    #[error("transient backend error: {0}")]
    Transient(String),

    /// The request is invalid and will never succeed.
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("resource not found: {0}")]
    NotFound(String),
}

impl BackendError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// Asynchronous, eventually-consistent resource API.
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Create a resource, or return the existing handle if `token` was
    /// already used.
    async fn create_resource(
        &self,
        kind: ResourceKind,
        spec: &serde_json::Value,
        token: &RequestToken,
    ) -> Result<ResourceHandle, BackendError>;

    /// Replace a resource's spec. A repeated `token` is a no-op.
    async fn update_resource(
        &self,
        handle: &ResourceHandle,
        spec: &serde_json::Value,
        token: &RequestToken,
    ) -> Result<(), BackendError>;

    /// Current readiness of a resource.
    async fn describe_resource(&self, handle: &ResourceHandle)
    -> Result<ResourceStatus, BackendError>;

    /// Delete a resource. Deleting twice is not an error.
    async fn delete_resource(&self, handle: &ResourceHandle) -> Result<(), BackendError>;
}
