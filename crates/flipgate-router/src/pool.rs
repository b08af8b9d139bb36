//! Target pools and their registered replicas.

use serde::{Deserialize, Serialize};
use serde_json::json;

use flipgate_core::{
    DeploymentContext, HealthCheckPolicy, HealthChecked, Provisionable, ResourceKind,
    TargetPoolId,
};
use flipgate_provision::ResourceHandle;

/// A compute replica endpoint registered into a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    pub id: String,
    pub address: String,
    pub port: u16,
    pub zone: String,
    /// Compute pool revision that launched this replica.
    pub revision: String,
}

impl Replica {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// A named, health-checked registration target: one per service and color.
///
/// The health-check policy is fixed at creation. `revision` increments on
/// every membership change and guards conditional updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetPool {
    pub id: TargetPoolId,
    pub name: String,
    pub port: u16,
    pub health: HealthCheckPolicy,
    pub revision: u64,
    pub replicas: Vec<Replica>,
    pub handle: Option<ResourceHandle>,
}

impl TargetPool {
    pub fn new(ctx: &DeploymentContext, id: TargetPoolId, port: u16, health: HealthCheckPolicy) -> Self {
        Self {
            name: ctx.name(&format!("tg-{}-{}", id.service, id.color)),
            id,
            port,
            health,
            revision: 0,
            replicas: Vec::new(),
            handle: None,
        }
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.replicas.iter().map(Replica::endpoint).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }
}

impl HealthChecked for TargetPool {
    fn health_check(&self) -> &HealthCheckPolicy {
        &self.health
    }
}

impl Provisionable for TargetPool {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::TargetGroup
    }

    fn logical_name(&self) -> String {
        self.name.clone()
    }

    fn resource_spec(&self) -> serde_json::Value {
        json!({
            "port": self.port,
            "protocol": "http",
            "target_type": "ip",
            "health_check": {
                "path": self.health.path,
                "healthy_threshold": self.health.healthy_threshold,
                "unhealthy_threshold": self.health.unhealthy_threshold,
                "timeout_secs": self.health.timeout.as_secs(),
                "interval_secs": self.health.interval.as_secs(),
                "success_code": self.health.success_code,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flipgate_core::Color;

    #[test]
    fn pool_names_follow_service_and_color() {
        let ctx = DeploymentContext::new("Dev", "1", "ap-northeast-1");
        let pool = TargetPool::new(
            &ctx,
            TargetPoolId::new("backend", Color::Green),
            80,
            HealthCheckPolicy::default(),
        );
        assert_eq!(pool.logical_name(), "Dev-tg-backend-green");
        assert_eq!(pool.resource_spec()["health_check"]["path"], "/healthcheck");
        assert_eq!(pool.resource_spec()["health_check"]["interval_secs"], 15);
        assert!(pool.is_empty());
    }
}
