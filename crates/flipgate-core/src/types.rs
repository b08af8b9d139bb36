//! Shared types used across Flipgate crates.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of a service under blue/green control (e.g. `backend`).
pub type ServiceName = String;

/// One of the two parallel target pools of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    Blue,
    Green,
}

impl Color {
    /// The opposite color.
    pub fn other(self) -> Self {
        match self {
            Color::Blue => Color::Green,
            Color::Green => Color::Blue,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Color::Blue => "blue",
            Color::Green => "green",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport protocol for listeners and reachability rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Http,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Http => f.write_str("http"),
        }
    }
}

/// Identifies a target pool: one per {service, color}.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetPoolId {
    pub service: ServiceName,
    pub color: Color,
}

impl TargetPoolId {
    pub fn new(service: &str, color: Color) -> Self {
        Self {
            service: service.to_string(),
            color,
        }
    }

    /// The pool of the same service with the other color.
    pub fn sibling(&self) -> Self {
        Self {
            service: self.service.clone(),
            color: self.color.other(),
        }
    }
}

impl fmt::Display for TargetPoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.service, self.color)
    }
}

/// Kinds of resources the provisioning backend knows how to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    VirtualNetwork,
    InternetGateway,
    Subnet,
    SecurityGroup,
    RouteTable,
    Endpoint,
    LoadBalancer,
    TargetGroup,
    Listener,
    TaskDefinition,
    ComputeService,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::VirtualNetwork => "virtual_network",
            ResourceKind::InternetGateway => "internet_gateway",
            ResourceKind::Subnet => "subnet",
            ResourceKind::SecurityGroup => "security_group",
            ResourceKind::RouteTable => "route_table",
            ResourceKind::Endpoint => "endpoint",
            ResourceKind::LoadBalancer => "load_balancer",
            ResourceKind::TargetGroup => "target_group",
            ResourceKind::Listener => "listener",
            ResourceKind::TaskDefinition => "task_definition",
            ResourceKind::ComputeService => "compute_service",
        };
        f.write_str(s)
    }
}

/// Health-check policy attached to a target pool.
///
/// Blue and green pools of a service always share the same policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckPolicy {
    /// HTTP path to probe.
    pub path: String,
    /// Consecutive successes before a replica is healthy.
    pub healthy_threshold: u32,
    /// Consecutive failures before a replica is unhealthy.
    pub unhealthy_threshold: u32,
    /// Timeout per probe.
    pub timeout: Duration,
    /// Interval between probes.
    pub interval: Duration,
    /// The only HTTP status counted as success.
    pub success_code: u16,
}

impl Default for HealthCheckPolicy {
    fn default() -> Self {
        Self {
            path: "/healthcheck".to_string(),
            healthy_threshold: 3,
            unhealthy_threshold: 2,
            timeout: Duration::from_secs(5),
            interval: Duration::from_secs(15),
            success_code: 200,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("empty image reference")]
    EmptyImage,
    #[error("invalid image reference: {0}")]
    InvalidImage(String),
}

/// A resolved container image reference, produced by the external build
/// pipeline. Never built or pushed here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(repository: &str, tag: &str) -> Self {
        Self {
            repository: repository.to_string(),
            tag: tag.to_string(),
        }
    }

    /// Parse `repository[:tag]`. A registry port (`host:5000/app`) is not
    /// mistaken for a tag; a missing tag means `latest`.
    pub fn parse(s: &str) -> Result<Self, ReferenceError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ReferenceError::EmptyImage);
        }
        let (repository, tag) = match s.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => (repo, tag),
            _ => (s, "latest"),
        };
        if repository.is_empty() || tag.is_empty() {
            return Err(ReferenceError::InvalidImage(s.to_string()));
        }
        Ok(Self::new(repository, tag))
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// Opaque handle into the external secret store.
///
/// Only the reference travels through Flipgate; the runtime resolves it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretRef(String);

impl SecretRef {
    pub fn new(handle: &str) -> Self {
        Self(handle.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
