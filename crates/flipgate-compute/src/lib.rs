//! flipgate-compute — task replicas behind target pools.
//!
//! A [`ComputePool`] is one immutable revision of a service: a task
//! definition plus a replica count, placed in the container subnets and
//! registered into exactly one target pool. Releases create new pools;
//! they never edit a running one.
//!
//! # Components
//!
//! - **`task`** — task definition shape, environment and secret references
//! - **`pool`** — placement, registration, scaling bounds, teardown
//! - **`autoscale`** — CPU target tracking with cooldowns

pub mod autoscale;
pub mod error;
pub mod pool;
pub mod task;

pub use autoscale::{Autoscaler, CpuSource, ScaleDecision, ServiceCpu, StaticCpu};
pub use error::{ComputeError, ComputeResult};
pub use pool::{ComputeManager, ComputePool, ComputePoolHandle, ScalingPolicy};
pub use task::TaskDefinition;
