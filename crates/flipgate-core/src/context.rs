//! The immutable deployment context passed into every component.

use serde::{Deserialize, Serialize};

use crate::config::DeploymentConfig;

/// Zone suffixes used in resource names, indexed by zone position.
const ZONE_SUFFIXES: [&str; 2] = ["1a", "1c"];

/// Stage, account, region and availability zones of one deployment.
///
/// Built once from configuration and shared by reference; components
/// never re-derive these identifiers on their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentContext {
    pub stage: String,
    pub account: String,
    pub region: String,
    pub zones: [String; 2],
}

impl DeploymentContext {
    /// Create a context with the region's `a` and `c` zones.
    pub fn new(stage: &str, account: &str, region: &str) -> Self {
        Self {
            stage: stage.to_string(),
            account: account.to_string(),
            region: region.to_string(),
            zones: [format!("{region}a"), format!("{region}c")],
        }
    }

    pub fn from_config(cfg: &DeploymentConfig) -> Self {
        let mut ctx = Self::new(&cfg.stage, &cfg.account, &cfg.region);
        if let Some(zones) = &cfg.zones
            && zones.len() == 2
        {
            ctx.zones = [zones[0].clone(), zones[1].clone()];
        }
        ctx
    }

    /// Stage-qualified resource name: `{stage}-{suffix}`.
    pub fn name(&self, suffix: &str) -> String {
        format!("{}-{}", self.stage, suffix)
    }

    /// Availability zone at `index` (0 or 1).
    pub fn zone(&self, index: usize) -> &str {
        &self.zones[index % 2]
    }

    /// Short zone suffix used in names (`1a`, `1c`).
    pub fn zone_suffix(index: usize) -> &'static str {
        ZONE_SUFFIXES[index % 2]
    }

    /// Prefix for idempotency tokens issued under this context.
    pub fn token_scope(&self) -> String {
        format!("{}/{}/{}", self.account, self.region, self.stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_stage_prefixed() {
        let ctx = DeploymentContext::new("Dev", "123456789012", "ap-northeast-1");
        assert_eq!(ctx.name("sg-ingress"), "Dev-sg-ingress");
        assert_eq!(ctx.zone(0), "ap-northeast-1a");
        assert_eq!(ctx.zone(1), "ap-northeast-1c");
        assert_eq!(DeploymentContext::zone_suffix(1), "1c");
    }

    #[test]
    fn explicit_zones_override_defaults() {
        let cfg = DeploymentConfig {
            stage: "Prod".to_string(),
            account: "1".to_string(),
            region: "eu-west-1".to_string(),
            zones: Some(vec!["eu-west-1b".to_string(), "eu-west-1c".to_string()]),
        };
        let ctx = DeploymentContext::from_config(&cfg);
        assert_eq!(ctx.zones, ["eu-west-1b".to_string(), "eu-west-1c".to_string()]);
        assert_eq!(ctx.token_scope(), "1/eu-west-1/Prod");
    }
}
