//! Capability traits implemented by concrete resources.
//!
//! Instead of each resource group exposing its own getters, everything
//! the provisioner creates is `Provisionable`, everything a router probes
//! is `HealthChecked`, and everything that forwards traffic is `Routable`.

use crate::types::{HealthCheckPolicy, ResourceKind, TargetPoolId};

/// A resource that can be handed to the provisioning backend.
pub trait Provisionable: Send + Sync {
    /// Which kind of resource this is.
    fn resource_kind(&self) -> ResourceKind;

    /// Stable, stage-qualified name. Also the idempotency key.
    fn logical_name(&self) -> String;

    /// Backend-facing description of the resource.
    fn resource_spec(&self) -> serde_json::Value;
}

/// A resource probed with a health-check policy.
pub trait HealthChecked {
    fn health_check(&self) -> &HealthCheckPolicy;
}

/// A resource that forwards traffic to exactly one target pool.
pub trait Routable {
    fn port(&self) -> u16;

    /// The pool currently receiving traffic.
    fn forwarding_target(&self) -> TargetPoolId;
}
