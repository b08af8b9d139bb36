//! Build stages and their dependencies.

use std::fmt;

use serde::{Deserialize, Serialize};

use flipgate_provision::{GraphError, ResourceGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildStage {
    Network,
    Subnets,
    SecurityPolicy,
    Routes,
    Endpoints,
    Routers,
    Compute,
}

impl BuildStage {
    pub const ALL: [BuildStage; 7] = [
        BuildStage::Network,
        BuildStage::Subnets,
        BuildStage::SecurityPolicy,
        BuildStage::Routes,
        BuildStage::Endpoints,
        BuildStage::Routers,
        BuildStage::Compute,
    ];

    /// Stages that must be ready before this one runs.
    pub fn depends_on(self) -> &'static [BuildStage] {
        use BuildStage::*;
        match self {
            Network => &[],
            Subnets => &[Network],
            SecurityPolicy => &[Network],
            Routes => &[Network, Subnets],
            Endpoints => &[Subnets, SecurityPolicy, Routes],
            Routers => &[Subnets, SecurityPolicy],
            Compute => &[Subnets, SecurityPolicy, Endpoints, Routers],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStage::Network => "network",
            BuildStage::Subnets => "subnets",
            BuildStage::SecurityPolicy => "security-policy",
            BuildStage::Routes => "routes",
            BuildStage::Endpoints => "endpoints",
            BuildStage::Routers => "routers",
            BuildStage::Compute => "compute",
        }
    }

    /// The full stage graph.
    pub fn graph() -> Result<ResourceGraph<BuildStage>, GraphError> {
        let mut graph = ResourceGraph::new();
        for stage in Self::ALL {
            graph.add_node(stage, stage.depends_on())?;
        }
        Ok(graph)
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_respects_every_dependency() {
        let order = BuildStage::graph().unwrap().topological_order().unwrap();
        assert_eq!(order.len(), BuildStage::ALL.len());
        assert_eq!(order.first(), Some(&BuildStage::Network));
        assert_eq!(order.last(), Some(&BuildStage::Compute));
        let pos = |s: BuildStage| order.iter().position(|o| *o == s).unwrap();
        for stage in BuildStage::ALL {
            for dep in stage.depends_on() {
                assert!(pos(*dep) < pos(stage), "{dep} must precede {stage}");
            }
        }
    }

    #[test]
    fn compute_waits_for_routers() {
        let mut graph = BuildStage::graph().unwrap();
        for stage in [
            BuildStage::Network,
            BuildStage::Subnets,
            BuildStage::SecurityPolicy,
            BuildStage::Routes,
            BuildStage::Endpoints,
        ] {
            graph.mark_ready(&stage).unwrap();
        }
        assert!(matches!(
            graph.ensure_dependencies_ready(&BuildStage::Compute),
            Err(GraphError::DependencyNotReady { .. })
        ));
        graph.mark_ready(&BuildStage::Routers).unwrap();
        assert!(graph.ensure_dependencies_ready(&BuildStage::Compute).is_ok());
    }
}
