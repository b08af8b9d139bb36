//! SecurityPolicyGraph: deny-by-default reachability between boundaries.
//!
//! Each boundary accepts only the inbound traffic its rules declare and
//! may send anything outbound. The graph is mutable while the topology is
//! built, then sealed; later components ask it to `require` the paths
//! they depend on, which turns a missing rule into a build-time error.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use flipgate_core::{DeploymentContext, Protocol, Provisionable, ResourceKind};

use crate::error::{NetworkError, NetworkResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoundaryRole {
    Ingress,
    InternalRouter,
    Container,
    FrontContainer,
    Database,
    EgressEndpoint,
    Management,
}

impl BoundaryRole {
    pub const ALL: [BoundaryRole; 7] = [
        BoundaryRole::Ingress,
        BoundaryRole::InternalRouter,
        BoundaryRole::Container,
        BoundaryRole::FrontContainer,
        BoundaryRole::Database,
        BoundaryRole::EgressEndpoint,
        BoundaryRole::Management,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BoundaryRole::Ingress => "ingress",
            BoundaryRole::InternalRouter => "internal-router",
            BoundaryRole::Container => "container",
            BoundaryRole::FrontContainer => "front-container",
            BoundaryRole::Database => "database",
            BoundaryRole::EgressEndpoint => "egress-endpoint",
            BoundaryRole::Management => "management",
        }
    }

    fn name_suffix(self) -> &'static str {
        match self {
            BoundaryRole::Ingress => "sg-ingress",
            BoundaryRole::InternalRouter => "sg-internal",
            BoundaryRole::Container => "sg-container",
            BoundaryRole::FrontContainer => "sg-front-container",
            BoundaryRole::Database => "sg-db",
            BoundaryRole::EgressEndpoint => "sg-vpce",
            BoundaryRole::Management => "sg-management",
        }
    }

    fn description(self) -> &'static str {
        match self {
            BoundaryRole::Ingress => "Security group for ingress",
            BoundaryRole::InternalRouter => "Security group for internal load balancer",
            BoundaryRole::Container => "Security group of backend app",
            BoundaryRole::FrontContainer => "Security group of front container app",
            BoundaryRole::Database => "Security group of database",
            BoundaryRole::EgressEndpoint => "Security group of VPC endpoint",
            BoundaryRole::Management => "Security group of management server",
        }
    }
}

impl fmt::Display for BoundaryRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source side of a reachability rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Peer {
    AnyIpv4,
    Boundary(BoundaryRole),
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::AnyIpv4 => f.write_str("0.0.0.0/0"),
            Peer::Boundary(role) => write!(f, "{role}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReachabilityRule {
    pub source: Peer,
    pub protocol: Protocol,
    pub port: u16,
    pub description: String,
}

impl ReachabilityRule {
    fn admits(&self, from: Peer, protocol: Protocol, port: u16) -> bool {
        self.port == port
            && self.protocol == protocol
            && (self.source == from || self.source == Peer::AnyIpv4)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityBoundary {
    pub role: BoundaryRole,
    pub name: String,
    pub description: String,
    /// Inbound rules. Empty means nothing gets in.
    pub rules: Vec<ReachabilityRule>,
    pub allow_all_outbound: bool,
}

impl Provisionable for SecurityBoundary {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::SecurityGroup
    }

    fn logical_name(&self) -> String {
        self.name.clone()
    }

    fn resource_spec(&self) -> serde_json::Value {
        let ingress: Vec<_> = self
            .rules
            .iter()
            .map(|r| {
                json!({
                    "source": r.source.to_string(),
                    "protocol": r.protocol.to_string(),
                    "port": r.port,
                    "description": r.description,
                })
            })
            .collect();
        json!({
            "description": self.description,
            "allow_all_outbound": self.allow_all_outbound,
            "ingress": ingress,
        })
    }
}

/// The fixed reachability table of the two-tier topology.
const STANDARD_RULES: &[(Peer, BoundaryRole, u16, &str)] = &[
    (Peer::AnyIpv4, BoundaryRole::Ingress, 80, "Allow HTTP traffic on port 80"),
    (
        Peer::Boundary(BoundaryRole::Ingress),
        BoundaryRole::FrontContainer,
        80,
        "HTTP for ingress",
    ),
    (
        Peer::Boundary(BoundaryRole::FrontContainer),
        BoundaryRole::InternalRouter,
        80,
        "HTTP for front container",
    ),
    (
        Peer::Boundary(BoundaryRole::Management),
        BoundaryRole::InternalRouter,
        80,
        "HTTP for management server",
    ),
    (
        Peer::Boundary(BoundaryRole::Management),
        BoundaryRole::InternalRouter,
        10080,
        "Test port from management server",
    ),
    (
        Peer::Boundary(BoundaryRole::InternalRouter),
        BoundaryRole::Container,
        80,
        "HTTP for internal router",
    ),
    (
        Peer::Boundary(BoundaryRole::Container),
        BoundaryRole::Database,
        3306,
        "MySQL protocol from backend app",
    ),
    (
        Peer::Boundary(BoundaryRole::FrontContainer),
        BoundaryRole::Database,
        3306,
        "MySQL protocol from frontend app",
    ),
    (
        Peer::Boundary(BoundaryRole::Management),
        BoundaryRole::Database,
        3306,
        "MySQL protocol from management server",
    ),
    (
        Peer::Boundary(BoundaryRole::Container),
        BoundaryRole::EgressEndpoint,
        443,
        "HTTPS for container app",
    ),
    (
        Peer::Boundary(BoundaryRole::FrontContainer),
        BoundaryRole::EgressEndpoint,
        443,
        "HTTPS for front container app",
    ),
    (
        Peer::Boundary(BoundaryRole::Management),
        BoundaryRole::EgressEndpoint,
        443,
        "HTTPS for management server",
    ),
];

/// Boundaries and the directed, port-scoped edges between them.
#[derive(Debug, Clone)]
pub struct SecurityPolicyGraph {
    ctx: DeploymentContext,
    boundaries: BTreeMap<BoundaryRole, SecurityBoundary>,
    sealed: bool,
}

impl SecurityPolicyGraph {
    pub fn new(ctx: &DeploymentContext) -> Self {
        Self {
            ctx: ctx.clone(),
            boundaries: BTreeMap::new(),
            sealed: false,
        }
    }

    /// Declare every boundary, apply the fixed rule table, and seal.
    pub fn standard(ctx: &DeploymentContext) -> NetworkResult<Self> {
        let mut graph = Self::new(ctx);
        for role in BoundaryRole::ALL {
            graph.declare_boundary(role)?;
        }
        for (from, to, port, reason) in STANDARD_RULES {
            graph.allow(*from, *to, Protocol::Tcp, *port, reason)?;
        }
        graph.seal();
        Ok(graph)
    }

    /// Create the boundary for `role`. The role itself is the handle.
    pub fn declare_boundary(&mut self, role: BoundaryRole) -> NetworkResult<BoundaryRole> {
        if self.sealed {
            return Err(NetworkError::GraphSealed);
        }
        if self.boundaries.contains_key(&role) {
            return Err(NetworkError::DuplicateBoundary(role.to_string()));
        }
        self.boundaries.insert(
            role,
            SecurityBoundary {
                role,
                name: self.ctx.name(role.name_suffix()),
                description: role.description().to_string(),
                rules: Vec::new(),
                allow_all_outbound: true,
            },
        );
        Ok(role)
    }

    /// Let `from` reach `to` on `protocol`/`port`. Re-adding a rule is a no-op.
    pub fn allow(
        &mut self,
        from: Peer,
        to: BoundaryRole,
        protocol: Protocol,
        port: u16,
        reason: &str,
    ) -> NetworkResult<()> {
        if self.sealed {
            return Err(NetworkError::GraphSealed);
        }
        if let Peer::Boundary(source) = from
            && !self.boundaries.contains_key(&source)
        {
            return Err(NetworkError::UnknownBoundary(source.to_string()));
        }
        let boundary = self
            .boundaries
            .get_mut(&to)
            .ok_or_else(|| NetworkError::UnknownBoundary(to.to_string()))?;

        let exists = boundary
            .rules
            .iter()
            .any(|r| r.source == from && r.protocol == protocol && r.port == port);
        if !exists {
            boundary.rules.push(ReachabilityRule {
                source: from,
                protocol,
                port,
                description: reason.to_string(),
            });
            debug!(%from, %to, port, "reachability rule added");
        }
        Ok(())
    }

    /// Freeze the graph. Rules and boundaries can no longer change.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Whether a declared rule admits `from` → `to` on TCP `port`.
    pub fn permits(&self, from: Peer, to: BoundaryRole, port: u16) -> bool {
        self.boundaries
            .get(&to)
            .is_some_and(|b| b.rules.iter().any(|r| r.admits(from, Protocol::Tcp, port)))
    }

    /// Fail with `UnreachableTarget` unless `from` may reach `to` on `port`.
    pub fn require(&self, from: BoundaryRole, to: BoundaryRole, port: u16) -> NetworkResult<()> {
        if self.permits(Peer::Boundary(from), to, port) {
            Ok(())
        } else {
            Err(NetworkError::UnreachableTarget {
                from: from.to_string(),
                to: to.to_string(),
                port,
            })
        }
    }

    pub fn boundary(&self, role: BoundaryRole) -> Option<&SecurityBoundary> {
        self.boundaries.get(&role)
    }

    pub fn boundaries(&self) -> impl Iterator<Item = &SecurityBoundary> {
        self.boundaries.values()
    }

    /// Inbound rules of a boundary; empty for undeclared roles.
    pub fn inbound(&self, role: BoundaryRole) -> &[ReachabilityRule] {
        self.boundaries
            .get(&role)
            .map(|b| b.rules.as_slice())
            .unwrap_or(&[])
    }

    /// Every declared edge as `(source, target, port)`, sorted.
    pub fn edges(&self) -> Vec<(Peer, BoundaryRole, u16)> {
        let mut edges: Vec<_> = self
            .boundaries
            .values()
            .flat_map(|b| b.rules.iter().map(|r| (r.source, b.role, r.port)))
            .collect();
        edges.sort();
        edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BoundaryRole::*;

    fn ctx() -> DeploymentContext {
        DeploymentContext::new("Dev", "123456789012", "ap-northeast-1")
    }

    fn b(role: BoundaryRole) -> Peer {
        Peer::Boundary(role)
    }

    #[test]
    fn standard_graph_has_exactly_the_fixed_edges() {
        let graph = SecurityPolicyGraph::standard(&ctx()).unwrap();
        let mut expected = vec![
            (Peer::AnyIpv4, Ingress, 80),
            (b(Ingress), FrontContainer, 80),
            (b(FrontContainer), InternalRouter, 80),
            (b(Management), InternalRouter, 80),
            (b(Management), InternalRouter, 10080),
            (b(InternalRouter), Container, 80),
            (b(Container), Database, 3306),
            (b(FrontContainer), Database, 3306),
            (b(Management), Database, 3306),
            (b(Container), EgressEndpoint, 443),
            (b(FrontContainer), EgressEndpoint, 443),
            (b(Management), EgressEndpoint, 443),
        ];
        expected.sort();
        assert_eq!(graph.edges(), expected);
    }

    #[test]
    fn undeclared_paths_are_denied() {
        let graph = SecurityPolicyGraph::standard(&ctx()).unwrap();
        let declared = graph.edges();
        for from in BoundaryRole::ALL {
            for to in BoundaryRole::ALL {
                for port in [22, 80, 443, 3306, 8080, 10080] {
                    let explicit = declared.contains(&(b(from), to, port))
                        || declared.contains(&(Peer::AnyIpv4, to, port));
                    assert_eq!(graph.permits(b(from), to, port), explicit, "{from}->{to}:{port}");
                }
            }
        }
    }

    #[test]
    fn boundaries_without_inbound_rules_accept_nothing() {
        let graph = SecurityPolicyGraph::standard(&ctx()).unwrap();
        assert!(graph.inbound(Management).is_empty());
        assert!(!graph.permits(Peer::AnyIpv4, Management, 22));
        assert!(!graph.permits(b(Container), FrontContainer, 80));
        assert!(!graph.permits(Peer::AnyIpv4, InternalRouter, 80));
    }

    #[test]
    fn require_reports_unreachable_target() {
        let graph = SecurityPolicyGraph::standard(&ctx()).unwrap();
        assert!(graph.require(InternalRouter, Container, 80).is_ok());
        assert!(graph.require(Management, InternalRouter, 10080).is_ok());
        assert_eq!(
            graph.require(FrontContainer, InternalRouter, 10080),
            Err(NetworkError::UnreachableTarget {
                from: "front-container".into(),
                to: "internal-router".into(),
                port: 10080,
            })
        );
    }

    #[test]
    fn sealed_graph_rejects_changes() {
        let mut graph = SecurityPolicyGraph::standard(&ctx()).unwrap();
        assert!(graph.is_sealed());
        assert_eq!(
            graph.allow(b(Container), FrontContainer, Protocol::Tcp, 80, "no"),
            Err(NetworkError::GraphSealed)
        );
        assert_eq!(graph.declare_boundary(Ingress), Err(NetworkError::GraphSealed));
    }

    #[test]
    fn rules_need_declared_boundaries() {
        let mut graph = SecurityPolicyGraph::new(&ctx());
        graph.declare_boundary(Database).unwrap();
        assert_eq!(
            graph.declare_boundary(Database),
            Err(NetworkError::DuplicateBoundary("database".into()))
        );
        assert_eq!(
            graph.allow(b(Container), Database, Protocol::Tcp, 3306, "x"),
            Err(NetworkError::UnknownBoundary("container".into()))
        );
        graph.declare_boundary(Container).unwrap();
        graph.allow(b(Container), Database, Protocol::Tcp, 3306, "x").unwrap();
        graph.allow(b(Container), Database, Protocol::Tcp, 3306, "x").unwrap();
        assert_eq!(graph.inbound(Database).len(), 1);
    }

    #[test]
    fn boundary_names_and_spec() {
        let graph = SecurityPolicyGraph::standard(&ctx()).unwrap();
        let internal = graph.boundary(InternalRouter).unwrap();
        assert_eq!(internal.logical_name(), "Dev-sg-internal");
        let spec = internal.resource_spec();
        assert_eq!(spec["allow_all_outbound"], true);
        assert_eq!(spec["ingress"].as_array().unwrap().len(), 3);
        assert_eq!(graph.boundary(EgressEndpoint).unwrap().name, "Dev-sg-vpce");
    }
}
