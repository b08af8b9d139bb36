//! The virtual network, its internet gateway, and endpoint connections.

use std::fmt;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use serde_json::json;

use flipgate_core::{DeploymentContext, Provisionable, ResourceKind};

use crate::subnet::SubnetGroup;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualNetwork {
    pub name: String,
    pub cidr: Ipv4Net,
    pub dns_hostnames: bool,
    pub dns_support: bool,
}

impl VirtualNetwork {
    pub fn new(ctx: &DeploymentContext, cidr: Ipv4Net) -> Self {
        Self {
            name: ctx.name("vpc"),
            cidr: cidr.trunc(),
            dns_hostnames: true,
            dns_support: true,
        }
    }
}

impl Provisionable for VirtualNetwork {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::VirtualNetwork
    }

    fn logical_name(&self) -> String {
        self.name.clone()
    }

    fn resource_spec(&self) -> serde_json::Value {
        json!({
            "cidr": self.cidr.to_string(),
            "enable_dns_hostnames": self.dns_hostnames,
            "enable_dns_support": self.dns_support,
        })
    }
}

/// Internet gateway attached to the virtual network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternetGateway {
    pub name: String,
    pub network: String,
}

impl InternetGateway {
    pub fn new(ctx: &DeploymentContext, network: &VirtualNetwork) -> Self {
        Self {
            name: ctx.name("igw"),
            network: network.name.clone(),
        }
    }
}

impl Provisionable for InternetGateway {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::InternetGateway
    }

    fn logical_name(&self) -> String {
        self.name.clone()
    }

    fn resource_spec(&self) -> serde_json::Value {
        json!({ "attach_to": self.network })
    }
}

/// Managed services reached without leaving the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointService {
    RegistryApi,
    RegistryDocker,
    Logs,
    ObjectStorage,
}

impl EndpointService {
    pub fn service_name(self, region: &str) -> String {
        let suffix = match self {
            EndpointService::RegistryApi => "ecr.api",
            EndpointService::RegistryDocker => "ecr.dkr",
            EndpointService::Logs => "logs",
            EndpointService::ObjectStorage => "s3",
        };
        format!("com.amazonaws.{region}.{suffix}")
    }

    fn short_name(self) -> &'static str {
        match self {
            EndpointService::RegistryApi => "ecr-api",
            EndpointService::RegistryDocker => "dkr",
            EndpointService::Logs => "logs",
            EndpointService::ObjectStorage => "s3",
        }
    }
}

impl fmt::Display for EndpointService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Interface endpoint placed in the egress subnets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceEndpoint {
    pub name: String,
    pub service: EndpointService,
    pub service_name: String,
    pub subnets: Vec<String>,
    /// Security boundary guarding the endpoint.
    pub boundary: String,
}

impl InterfaceEndpoint {
    /// The three interface endpoints container replicas need.
    pub fn standard(
        ctx: &DeploymentContext,
        egress: &SubnetGroup,
        boundary: &str,
    ) -> Vec<InterfaceEndpoint> {
        [
            EndpointService::RegistryApi,
            EndpointService::RegistryDocker,
            EndpointService::Logs,
        ]
        .into_iter()
        .map(|service| InterfaceEndpoint {
            name: ctx.name(&format!("vpce-{service}")),
            service,
            service_name: service.service_name(&ctx.region),
            subnets: egress.names(),
            boundary: boundary.to_string(),
        })
        .collect()
    }
}

impl Provisionable for InterfaceEndpoint {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::Endpoint
    }

    fn logical_name(&self) -> String {
        self.name.clone()
    }

    fn resource_spec(&self) -> serde_json::Value {
        json!({
            "type": "interface",
            "service_name": self.service_name,
            "subnets": self.subnets,
            "security_group": self.boundary,
            "private_dns": true,
        })
    }
}

/// Gateway endpoint reached through route table entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayEndpoint {
    pub name: String,
    pub service: EndpointService,
    pub service_name: String,
    pub route_tables: Vec<String>,
}

impl GatewayEndpoint {
    pub fn object_storage(ctx: &DeploymentContext, route_tables: Vec<String>) -> Self {
        let service = EndpointService::ObjectStorage;
        Self {
            name: ctx.name(&format!("vpce-{service}")),
            service,
            service_name: service.service_name(&ctx.region),
            route_tables,
        }
    }
}

impl Provisionable for GatewayEndpoint {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::Endpoint
    }

    fn logical_name(&self) -> String {
        self.name.clone()
    }

    fn resource_spec(&self) -> serde_json::Value {
        json!({
            "type": "gateway",
            "service_name": self.service_name,
            "route_tables": self.route_tables,
        })
    }
}
