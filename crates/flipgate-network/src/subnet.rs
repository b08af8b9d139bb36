//! SubnetPlanner: carves the address space into role-tagged subnets.
//!
//! Allocation is a fixed table of /24 block offsets, not a packing
//! algorithm: the same address space always yields the same plan.

use std::fmt;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use flipgate_core::{DeploymentContext, Provisionable, ResourceKind};

use crate::error::{NetworkError, NetworkResult};

/// Zones every subnet group spans.
pub const ZONE_COUNT: usize = 2;

/// Prefix length of each allocated subnet.
const SUBNET_PREFIX: u8 = 24;

/// Largest address space prefix that still holds every block.
const MAX_SPACE_PREFIX: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubnetRole {
    Ingress,
    Egress,
    Container,
    Database,
    Management,
}

impl SubnetRole {
    pub const ALL: [SubnetRole; 5] = [
        SubnetRole::Ingress,
        SubnetRole::Container,
        SubnetRole::Database,
        SubnetRole::Management,
        SubnetRole::Egress,
    ];

    /// Position in [`SubnetRole::ALL`].
    pub fn index(self) -> usize {
        match self {
            SubnetRole::Ingress => 0,
            SubnetRole::Container => 1,
            SubnetRole::Database => 2,
            SubnetRole::Management => 3,
            SubnetRole::Egress => 4,
        }
    }

    /// /24 block offsets within the address space, one per zone.
    pub fn blocks(self) -> [u32; ZONE_COUNT] {
        match self {
            SubnetRole::Ingress => [0, 1],
            SubnetRole::Container => [8, 9],
            SubnetRole::Database => [16, 17],
            SubnetRole::Management => [240, 241],
            SubnetRole::Egress => [248, 249],
        }
    }

    /// Subnets of this role map public addresses on launch.
    pub fn is_public(self) -> bool {
        matches!(self, SubnetRole::Ingress | SubnetRole::Management)
    }

    /// Short name used in resource names.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubnetRole::Ingress => "ingress",
            SubnetRole::Egress => "egress",
            SubnetRole::Container => "container",
            SubnetRole::Database => "db",
            SubnetRole::Management => "management",
        }
    }
}

impl fmt::Display for SubnetRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One subnet in one zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub name: String,
    pub role: SubnetRole,
    pub zone_index: usize,
    pub zone: String,
    pub cidr: Ipv4Net,
    pub public: bool,
}

impl Provisionable for Subnet {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::Subnet
    }

    fn logical_name(&self) -> String {
        self.name.clone()
    }

    fn resource_spec(&self) -> serde_json::Value {
        json!({
            "cidr": self.cidr.to_string(),
            "zone": self.zone,
            "map_public_ip_on_launch": self.public,
        })
    }
}

/// The two subnets of one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetGroup {
    pub role: SubnetRole,
    pub subnets: [Subnet; ZONE_COUNT],
}

impl SubnetGroup {
    pub fn names(&self) -> Vec<String> {
        self.subnets.iter().map(|s| s.name.clone()).collect()
    }

    pub fn cidrs(&self) -> [Ipv4Net; ZONE_COUNT] {
        [self.subnets[0].cidr, self.subnets[1].cidr]
    }
}

/// Output of [`SubnetPlanner::plan`]: five groups, ten subnets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetPlan {
    pub address_space: Ipv4Net,
    pub groups: Vec<SubnetGroup>,
}

impl SubnetPlan {
    /// Groups are stored in [`SubnetRole::ALL`] order.
    pub fn group(&self, role: SubnetRole) -> &SubnetGroup {
        &self.groups[role.index()]
    }

    pub fn subnets(&self) -> impl Iterator<Item = &Subnet> {
        self.groups.iter().flat_map(|g| g.subnets.iter())
    }
}

pub struct SubnetPlanner;

impl SubnetPlanner {
    /// Partition `address_space` into the fixed subnet plan.
    ///
    /// Only two zones are supported. The space must be a /16 or larger;
    /// anything smaller cannot hold the management and egress blocks.
    pub fn plan(
        address_space: Ipv4Net,
        zone_count: usize,
        ctx: &DeploymentContext,
    ) -> NetworkResult<SubnetPlan> {
        if zone_count != ZONE_COUNT {
            return Err(NetworkError::UnsupportedZoneCount(zone_count));
        }
        let space = address_space.trunc();
        if space.prefix_len() > MAX_SPACE_PREFIX {
            return Err(NetworkError::AllocationConflict {
                space: space.to_string(),
                reason: format!(
                    "need a /{MAX_SPACE_PREFIX} or larger to hold 10 /{SUBNET_PREFIX} subnets"
                ),
            });
        }

        let base = u32::from(space.network());
        let mut groups = Vec::with_capacity(SubnetRole::ALL.len());
        for role in SubnetRole::ALL {
            let blocks = role.blocks();
            let subnet = |zone_index: usize| -> NetworkResult<Subnet> {
                let addr = Ipv4Addr::from(base + (blocks[zone_index] << 8));
                let cidr = Ipv4Net::new(addr, SUBNET_PREFIX).map_err(|e| {
                    NetworkError::AllocationConflict {
                        space: space.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                let visibility = if role.is_public() { "public" } else { "private" };
                Ok(Subnet {
                    name: ctx.name(&format!(
                        "subnet-{visibility}-{role}-{}",
                        DeploymentContext::zone_suffix(zone_index)
                    )),
                    role,
                    zone_index,
                    zone: ctx.zone(zone_index).to_string(),
                    cidr,
                    public: role.is_public(),
                })
            };
            groups.push(SubnetGroup {
                role,
                subnets: [subnet(0)?, subnet(1)?],
            });
        }

        let plan = SubnetPlan {
            address_space: space,
            groups,
        };
        verify_disjoint(&plan)?;
        debug!(space = %plan.address_space, subnets = plan.subnets().count(), "subnet plan computed");
        Ok(plan)
    }
}

fn verify_disjoint(plan: &SubnetPlan) -> NetworkResult<()> {
    let all: Vec<&Subnet> = plan.subnets().collect();
    for (i, a) in all.iter().enumerate() {
        if !plan.address_space.contains(&a.cidr) {
            return Err(NetworkError::AllocationConflict {
                space: plan.address_space.to_string(),
                reason: format!("{} ({}) falls outside", a.name, a.cidr),
            });
        }
        for b in &all[i + 1..] {
            if a.cidr.contains(&b.cidr.network()) || b.cidr.contains(&a.cidr.network()) {
                return Err(NetworkError::AllocationConflict {
                    space: plan.address_space.to_string(),
                    reason: format!("{} overlaps {}", a.name, b.name),
                });
            }
        }
    }
    Ok(())
}
