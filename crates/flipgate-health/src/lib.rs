//! flipgate-health — health checking for target pools.
//!
//! Replicas are probed with the pool's [`HealthCheckPolicy`]. A
//! [`HealthTracker`] turns individual probe results into a status using
//! consecutive-success and consecutive-failure thresholds, and the
//! [`HealthGate`] blocks a release until every candidate replica is
//! healthy or the round budget runs out.
//!
//! # Architecture
//!
//! ```text
//! HealthGate::wait_until_healthy
//!   ├── one HealthTracker per endpoint
//!   ├── Prober::probe() every policy interval
//!   │   ├── HttpProber   → http_probe() over hyper
//!   │   └── ScriptedProber → canned results
//!   └── HealthCheckFailed after max rounds
//! ```
//!
//! [`HealthCheckPolicy`]: flipgate_core::HealthCheckPolicy

pub mod checker;
pub mod error;
pub mod gate;
pub mod prober;

pub use checker::{HealthStatus, HealthTracker, ProbeResult, http_probe};
pub use error::{HealthError, HealthResult};
pub use gate::HealthGate;
pub use prober::{HttpProber, Prober, ScriptedProber};
