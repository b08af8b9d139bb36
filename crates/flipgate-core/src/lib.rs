//! flipgate-core — types shared by every Flipgate crate.
//!
//! Holds the immutable [`DeploymentContext`] handed to each component,
//! the `flipgate.toml` configuration model, the opaque external
//! references (images, secrets), and the capability traits that
//! concrete resources implement.

pub mod capability;
pub mod config;
pub mod context;
pub mod types;

pub use capability::{HealthChecked, Provisionable, Routable};
pub use config::{FlipgateConfig, parse_duration};
pub use context::DeploymentContext;
pub use types::*;
