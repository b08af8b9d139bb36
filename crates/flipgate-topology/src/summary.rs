//! Serializable views of a planned or built topology.

use serde::Serialize;

use flipgate_core::DeploymentContext;
use flipgate_network::{RouteTopology, SecurityPolicyGraph, SubnetPlan};

use crate::builder::Topology;

#[derive(Debug, Clone, Serialize)]
pub struct SubnetSummary {
    pub name: String,
    pub role: String,
    pub zone: String,
    pub cidr: String,
    pub public: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeSummary {
    pub from: String,
    pub to: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteTableSummary {
    pub name: String,
    pub role: String,
    pub routes: Vec<String>,
    pub associations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListenerSummary {
    pub port: u16,
    pub role: String,
    pub target: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolSummary {
    pub target: String,
    pub revision: u64,
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterSummary {
    pub name: String,
    pub internal: bool,
    pub listeners: Vec<ListenerSummary>,
    pub pools: Vec<PoolSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopologySummary {
    pub stage: String,
    pub region: String,
    pub address_space: String,
    pub subnets: Vec<SubnetSummary>,
    pub security_edges: Vec<EdgeSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub route_tables: Vec<RouteTableSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub routers: Vec<RouterSummary>,
}

impl TopologySummary {
    /// The static part: subnets and security edges, before anything exists.
    pub fn planned(ctx: &DeploymentContext, plan: &SubnetPlan, security: &SecurityPolicyGraph) -> Self {
        Self {
            stage: ctx.stage.clone(),
            region: ctx.region.clone(),
            address_space: plan.address_space.to_string(),
            subnets: plan
                .subnets()
                .map(|s| SubnetSummary {
                    name: s.name.clone(),
                    role: s.role.to_string(),
                    zone: s.zone.clone(),
                    cidr: s.cidr.to_string(),
                    public: s.public,
                })
                .collect(),
            security_edges: security
                .edges()
                .into_iter()
                .map(|(from, to, port)| EdgeSummary {
                    from: from.to_string(),
                    to: to.to_string(),
                    port,
                })
                .collect(),
            route_tables: Vec::new(),
            routers: Vec::new(),
        }
    }

    fn with_routes(mut self, routes: &RouteTopology) -> Self {
        self.route_tables = routes
            .tables()
            .map(|t| RouteTableSummary {
                name: t.name.clone(),
                role: t.role.to_string(),
                routes: t
                    .routes
                    .iter()
                    .map(|r| format!("{} -> {}", r.destination, r.target))
                    .collect(),
                associations: t.associations.clone(),
            })
            .collect();
        self
    }
}

impl Topology {
    /// Current view, including live listener targets.
    pub fn summary(&self) -> TopologySummary {
        let mut summary =
            TopologySummary::planned(&self.ctx, &self.plan, &self.security).with_routes(&self.routes);
        let mut seen = Vec::new();
        for service in self.services.values() {
            let router = &service.router;
            if seen.contains(&router.name().to_string()) {
                continue;
            }
            seen.push(router.name().to_string());
            summary.routers.push(RouterSummary {
                name: router.name().to_string(),
                internal: router.is_internal(),
                listeners: router
                    .listeners()
                    .into_iter()
                    .map(|l| ListenerSummary {
                        port: l.port,
                        role: l.role.to_string(),
                        target: l.target.to_string(),
                    })
                    .collect(),
                pools: router
                    .pool_ids()
                    .into_iter()
                    .filter_map(|id| router.pool(&id))
                    .map(|p| PoolSummary {
                        target: p.id.to_string(),
                        revision: p.revision,
                        endpoints: p.endpoints(),
                    })
                    .collect(),
            });
        }
        summary
    }
}
