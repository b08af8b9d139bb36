//! RouteTopology: one route table per subnet role.
//!
//! Only internet-facing roles (ingress, management) may carry a default
//! route. Private roles reach managed services through endpoints.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use flipgate_core::{DeploymentContext, Provisionable, ResourceKind};

use crate::error::{NetworkError, NetworkResult};
use crate::subnet::{SubnetGroup, SubnetPlan, SubnetRole};
use crate::vpc::{GatewayEndpoint, InternetGateway};

const DEFAULT_DESTINATION: &str = "0.0.0.0/0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTarget {
    InternetGateway(String),
    GatewayEndpoint(String),
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteTarget::InternetGateway(name) | RouteTarget::GatewayEndpoint(name) => {
                f.write_str(name)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub destination: String,
    pub target: RouteTarget,
}

impl Route {
    pub fn is_default(&self) -> bool {
        self.destination == DEFAULT_DESTINATION
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    pub name: String,
    pub role: SubnetRole,
    pub routes: Vec<Route>,
    /// Names of the associated subnets.
    pub associations: Vec<String>,
}

impl RouteTable {
    pub fn default_route(&self) -> Option<&Route> {
        self.routes.iter().find(|r| r.is_default())
    }
}

impl Provisionable for RouteTable {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::RouteTable
    }

    fn logical_name(&self) -> String {
        self.name.clone()
    }

    fn resource_spec(&self) -> serde_json::Value {
        json!({
            "routes": self.routes,
            "associations": self.associations,
        })
    }
}

fn table_suffix(role: SubnetRole) -> String {
    match role {
        SubnetRole::Container => "route-app".to_string(),
        other => format!("route-{other}"),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTopology {
    tables: BTreeMap<SubnetRole, RouteTable>,
    /// Subnet name → owning table name.
    associations: BTreeMap<String, String>,
}

impl RouteTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// One table per role, every group attached, default routes on the
    /// internet-facing tables.
    pub fn standard(
        ctx: &DeploymentContext,
        plan: &SubnetPlan,
        gateway: &InternetGateway,
    ) -> NetworkResult<Self> {
        let mut topology = Self::new();
        for group in &plan.groups {
            topology.create_table(ctx, group.role)?;
            topology.attach(group, group.role)?;
        }
        for role in [SubnetRole::Ingress, SubnetRole::Management] {
            topology.add_default_route(role, gateway)?;
        }
        Ok(topology)
    }

    /// Create the route table for `role`.
    pub fn create_table(&mut self, ctx: &DeploymentContext, role: SubnetRole) -> NetworkResult<&RouteTable> {
        if self.tables.contains_key(&role) {
            return Err(NetworkError::InvalidRouteAssociation {
                target: role.to_string(),
                reason: "role already has a route table".to_string(),
            });
        }
        let table = self.tables.entry(role).or_insert(RouteTable {
            name: ctx.name(&table_suffix(role)),
            role,
            routes: Vec::new(),
            associations: Vec::new(),
        });
        Ok(table)
    }

    /// Associate every subnet of `group` with the table of `table_role`.
    ///
    /// A subnet belongs to exactly one table, and a table only serves
    /// subnets of its own role.
    pub fn attach(&mut self, group: &SubnetGroup, table_role: SubnetRole) -> NetworkResult<()> {
        let table = self.tables.get(&table_role).ok_or_else(|| {
            NetworkError::InvalidRouteAssociation {
                target: table_role.to_string(),
                reason: "no route table for role".to_string(),
            }
        })?;
        if group.role != table_role {
            return Err(NetworkError::InvalidRouteAssociation {
                target: table.name.clone(),
                reason: format!("{} subnets cannot use a {table_role} table", group.role),
            });
        }
        for subnet in &group.subnets {
            if let Some(existing) = self.associations.get(&subnet.name) {
                return Err(NetworkError::InvalidRouteAssociation {
                    target: subnet.name.clone(),
                    reason: format!("already associated with {existing}"),
                });
            }
        }

        let table_name = table.name.clone();
        for subnet in &group.subnets {
            self.associations
                .insert(subnet.name.clone(), table_name.clone());
        }
        if let Some(table) = self.tables.get_mut(&table_role) {
            table.associations.extend(group.names());
        }
        debug!(role = %group.role, table = %table_name, "subnet group attached");
        Ok(())
    }

    /// Add the internet default route. Ingress and management only.
    pub fn add_default_route(&mut self, role: SubnetRole, gateway: &InternetGateway) -> NetworkResult<()> {
        let table = self.table_mut(role)?;
        if !role.is_public() {
            return Err(NetworkError::InvalidRouteAssociation {
                target: table.name.clone(),
                reason: format!("{role} subnets never get a default route"),
            });
        }
        if table.default_route().is_some() {
            return Err(NetworkError::InvalidRouteAssociation {
                target: table.name.clone(),
                reason: "default route already present".to_string(),
            });
        }
        table.routes.push(Route {
            destination: DEFAULT_DESTINATION.to_string(),
            target: RouteTarget::InternetGateway(gateway.name.clone()),
        });
        debug!(table = %table.name, gateway = %gateway.name, "default route added");
        Ok(())
    }

    /// Route the endpoint's service prefix through a gateway endpoint.
    pub fn add_endpoint_route(&mut self, role: SubnetRole, endpoint: &GatewayEndpoint) -> NetworkResult<()> {
        let table = self.table_mut(role)?;
        table.routes.push(Route {
            destination: format!("prefix-list:{}", endpoint.service_name),
            target: RouteTarget::GatewayEndpoint(endpoint.name.clone()),
        });
        Ok(())
    }

    fn table_mut(&mut self, role: SubnetRole) -> NetworkResult<&mut RouteTable> {
        self.tables
            .get_mut(&role)
            .ok_or_else(|| NetworkError::InvalidRouteAssociation {
                target: role.to_string(),
                reason: "no route table for role".to_string(),
            })
    }

    pub fn table(&self, role: SubnetRole) -> Option<&RouteTable> {
        self.tables.get(&role)
    }

    pub fn tables(&self) -> impl Iterator<Item = &RouteTable> {
        self.tables.values()
    }

    /// Table a subnet is associated with.
    pub fn table_of(&self, subnet: &str) -> Option<&str> {
        self.associations.get(subnet).map(String::as_str)
    }
}
