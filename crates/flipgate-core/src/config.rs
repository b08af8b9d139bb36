//! flipgate.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlipgateConfig {
    pub deployment: DeploymentConfig,
    pub network: Option<NetworkConfig>,
    pub release: Option<ReleaseConfig>,
    pub provisioning: Option<ProvisioningConfig>,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub stage: String,
    pub account: String,
    pub region: String,
    pub zones: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub cidr: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseConfig {
    pub approval_wait: Option<String>,
    pub termination_wait: Option<String>,
    pub health_check_grace: Option<String>,
    pub health_check_max_rounds: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    pub max_attempts: Option<u32>,
    pub base_delay: Option<String>,
    pub max_delay: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub image: String,
    /// Fronted by the internet-facing router.
    pub public: Option<bool>,
    pub container_port: Option<u16>,
    pub cpu: Option<u32>,
    pub memory_mib: Option<u32>,
    pub desired_count: Option<u32>,
    pub min_count: Option<u32>,
    pub max_count: Option<u32>,
    pub target_cpu_percent: Option<f64>,
    pub environment: Option<BTreeMap<String, String>>,
    /// Environment variable name → secret store handle.
    pub secrets: Option<BTreeMap<String, String>>,
}

impl ServiceConfig {
    pub fn is_public(&self) -> bool {
        self.public.unwrap_or(false)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("deployment.stage must not be empty")]
    EmptyStage,
    #[error("expected exactly one public service, found {0}")]
    PublicServiceCount(usize),
    #[error("expected exactly one internal service, found {0}")]
    InternalServiceCount(usize),
    #[error("service {service}: min_count {min} exceeds max_count {max}")]
    ScalingBounds { service: String, min: u32, max: u32 },
    #[error("invalid duration {value:?} for {field}")]
    Duration { field: &'static str, value: String },
}

impl FlipgateConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FlipgateConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check the two-tier shape and value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.deployment.stage.trim().is_empty() {
            return Err(ConfigError::EmptyStage);
        }

        let public = self.services.values().filter(|s| s.is_public()).count();
        if public != 1 {
            return Err(ConfigError::PublicServiceCount(public));
        }
        let internal = self.services.len() - public;
        if internal != 1 {
            return Err(ConfigError::InternalServiceCount(internal));
        }

        for (name, svc) in &self.services {
            let min = svc.min_count.unwrap_or(1);
            let max = svc.max_count.unwrap_or(min.max(svc.desired_count.unwrap_or(1)));
            if min > max {
                return Err(ConfigError::ScalingBounds {
                    service: name.clone(),
                    min,
                    max,
                });
            }
        }

        if let Some(release) = &self.release {
            check_duration("release.approval_wait", &release.approval_wait)?;
            check_duration("release.termination_wait", &release.termination_wait)?;
            check_duration("release.health_check_grace", &release.health_check_grace)?;
        }
        if let Some(prov) = &self.provisioning {
            check_duration("provisioning.base_delay", &prov.base_delay)?;
            check_duration("provisioning.max_delay", &prov.max_delay)?;
        }
        Ok(())
    }

    /// The address space, defaulting to `10.0.0.0/16`.
    pub fn cidr(&self) -> &str {
        self.network
            .as_ref()
            .and_then(|n| n.cidr.as_deref())
            .unwrap_or("10.0.0.0/16")
    }

    /// The single internet-facing service.
    pub fn public_service(&self) -> Option<(&str, &ServiceConfig)> {
        self.services
            .iter()
            .find(|(_, s)| s.is_public())
            .map(|(n, s)| (n.as_str(), s))
    }

    /// The single internal service.
    pub fn internal_service(&self) -> Option<(&str, &ServiceConfig)> {
        self.services
            .iter()
            .find(|(_, s)| !s.is_public())
            .map(|(n, s)| (n.as_str(), s))
    }

    /// Scaffold the reference two-tier topology for a stage.
    pub fn scaffold(stage: &str) -> Self {
        let mut services = BTreeMap::new();
        services.insert(
            "frontend".to_string(),
            ServiceConfig {
                image: "frontend:v1".to_string(),
                public: Some(true),
                container_port: Some(80),
                cpu: Some(512),
                memory_mib: Some(1024),
                desired_count: Some(1),
                min_count: Some(1),
                max_count: Some(2),
                target_cpu_percent: Some(60.0),
                environment: None,
                secrets: Some(BTreeMap::from([(
                    "SESSION_SECRET_KEY".to_string(),
                    format!("{stage}/frontend/session"),
                )])),
            },
        );
        services.insert(
            "backend".to_string(),
            ServiceConfig {
                image: "backend:v1".to_string(),
                public: Some(false),
                container_port: Some(80),
                cpu: Some(512),
                memory_mib: Some(1024),
                desired_count: Some(2),
                min_count: Some(2),
                max_count: Some(4),
                target_cpu_percent: Some(60.0),
                environment: None,
                secrets: Some(BTreeMap::from([(
                    "DB_PASSWORD".to_string(),
                    format!("{stage}/backend/db-password"),
                )])),
            },
        );

        FlipgateConfig {
            deployment: DeploymentConfig {
                stage: stage.to_string(),
                account: "000000000000".to_string(),
                region: "ap-northeast-1".to_string(),
                zones: None,
            },
            network: Some(NetworkConfig {
                cidr: Some("10.0.0.0/16".to_string()),
            }),
            release: Some(ReleaseConfig {
                approval_wait: Some("10m".to_string()),
                termination_wait: Some("69m".to_string()),
                health_check_grace: Some("0s".to_string()),
                health_check_max_rounds: Some(20),
            }),
            provisioning: None,
            services,
        }
    }
}

fn check_duration(field: &'static str, value: &Option<String>) -> Result<(), ConfigError> {
    match value {
        Some(v) if parse_duration(v).is_none() => Err(ConfigError::Duration {
            field,
            value: v.clone(),
        }),
        _ => Ok(()),
    }
}

/// Parse a duration string like "500ms", "15s", "10m", "1h".
/// A bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
