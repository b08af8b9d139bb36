//! flipgate-topology — builds the whole two-tier topology in order.
//!
//! The build is a [`ResourceGraph`](flipgate_provision::ResourceGraph)
//! of [`BuildStage`]s walked in topological order. A stage runs only once
//! every stage it depends on has reported ready, and each stage consumes
//! the typed outputs of the ones before it.

pub mod builder;
pub mod error;
pub mod stage;
pub mod summary;

pub use builder::{ServiceSpec, ServiceTopology, Topology, TopologyBuilder};
pub use error::{TopologyError, TopologyResult};
pub use stage::BuildStage;
pub use summary::TopologySummary;
