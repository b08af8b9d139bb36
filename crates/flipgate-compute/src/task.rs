//! Task definitions: what one replica runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use flipgate_core::config::ServiceConfig;
use flipgate_core::{DeploymentContext, ImageRef, Provisionable, ResourceKind, SecretRef};

use crate::error::ComputeResult;

pub const DEFAULT_TASK_CPU: u32 = 512;
pub const DEFAULT_TASK_MEMORY_MIB: u32 = 1024;
pub const DEFAULT_CONTAINER_CPU: u32 = 256;
pub const DEFAULT_MEMORY_RESERVATION_MIB: u32 = 512;
pub const DEFAULT_CONTAINER_PORT: u16 = 80;

/// Image, resource shape, port mapping, environment and secret
/// references for one service revision.
///
/// Secrets are carried as store handles only. The runtime resolves them
/// when a replica starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub service: String,
    /// `{stage}-{service}-def`
    pub family: String,
    pub image: ImageRef,
    pub task_cpu: u32,
    pub task_memory_mib: u32,
    pub container_cpu: u32,
    pub memory_reservation_mib: u32,
    pub container_port: u16,
    pub readonly_root_filesystem: bool,
    pub environment: BTreeMap<String, String>,
    pub secrets: BTreeMap<String, SecretRef>,
}

impl TaskDefinition {
    pub fn new(ctx: &DeploymentContext, service: &str, image: ImageRef) -> Self {
        Self {
            service: service.to_string(),
            family: ctx.name(&format!("{service}-def")),
            image,
            task_cpu: DEFAULT_TASK_CPU,
            task_memory_mib: DEFAULT_TASK_MEMORY_MIB,
            container_cpu: DEFAULT_CONTAINER_CPU,
            memory_reservation_mib: DEFAULT_MEMORY_RESERVATION_MIB,
            container_port: DEFAULT_CONTAINER_PORT,
            readonly_root_filesystem: true,
            environment: BTreeMap::new(),
            secrets: BTreeMap::new(),
        }
    }

    /// Build from a `[services.<name>]` table.
    pub fn from_config(
        ctx: &DeploymentContext,
        service: &str,
        cfg: &ServiceConfig,
    ) -> ComputeResult<Self> {
        let mut task = Self::new(ctx, service, ImageRef::parse(&cfg.image)?);
        if let Some(cpu) = cfg.cpu {
            task.task_cpu = cpu;
        }
        if let Some(mem) = cfg.memory_mib {
            task.task_memory_mib = mem;
        }
        if let Some(port) = cfg.container_port {
            task.container_port = port;
        }
        if let Some(env) = &cfg.environment {
            task.environment = env.clone();
        }
        if let Some(secrets) = &cfg.secrets {
            task.secrets = secrets
                .iter()
                .map(|(name, handle)| (name.clone(), SecretRef::new(handle)))
                .collect();
        }
        Ok(task)
    }

    /// Same shape, different image. Used for each new release.
    pub fn with_image(&self, image: ImageRef) -> Self {
        Self {
            image,
            ..self.clone()
        }
    }

    pub fn env(mut self, name: &str, value: &str) -> Self {
        self.environment.insert(name.to_string(), value.to_string());
        self
    }

    pub fn secret(mut self, name: &str, secret: SecretRef) -> Self {
        self.secrets.insert(name.to_string(), secret);
        self
    }
}

impl Provisionable for TaskDefinition {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::TaskDefinition
    }

    /// Each image gets its own definition revision.
    fn logical_name(&self) -> String {
        format!("{}:{}", self.family, self.image.tag)
    }

    fn resource_spec(&self) -> serde_json::Value {
        let environment: Vec<_> = self
            .environment
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();
        let secrets: Vec<_> = self
            .secrets
            .iter()
            .map(|(name, secret)| json!({ "name": name, "value_from": secret.as_str() }))
            .collect();
        json!({
            "family": self.family,
            "cpu": self.task_cpu,
            "memory_mib": self.task_memory_mib,
            "network_mode": "awsvpc",
            "container": {
                "name": self.service,
                "image": self.image.to_string(),
                "cpu": self.container_cpu,
                "memory_reservation_mib": self.memory_reservation_mib,
                "readonly_root_filesystem": self.readonly_root_filesystem,
                "port_mappings": [{ "container_port": self.container_port, "protocol": "tcp" }],
                "environment": environment,
                "secrets": secrets,
            },
        })
    }
}
