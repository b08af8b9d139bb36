//! flipgate-network — the network topology model.
//!
//! One virtual network, partitioned into five role-tagged subnet groups
//! across two zones. Security boundaries form a deny-by-default
//! reachability graph, and each subnet group gets its own route table.
//!
//! # Components
//!
//! - **`vpc`** — virtual network, internet gateway, endpoint connections
//! - **`subnet`** — [`SubnetPlanner`] and its fixed allocation table
//! - **`security`** — [`SecurityPolicyGraph`] of boundaries and rules
//! - **`route`** — [`RouteTopology`] of route tables and associations

pub mod error;
pub mod route;
pub mod security;
pub mod subnet;
pub mod vpc;

pub use error::{NetworkError, NetworkResult};
pub use route::{Route, RouteTable, RouteTarget, RouteTopology};
pub use security::{BoundaryRole, Peer, ReachabilityRule, SecurityBoundary, SecurityPolicyGraph};
pub use subnet::{Subnet, SubnetGroup, SubnetPlan, SubnetPlanner, SubnetRole};
pub use vpc::{EndpointService, GatewayEndpoint, InterfaceEndpoint, InternetGateway, VirtualNetwork};
