//! flipgate-router — the load-balancing layer.
//!
//! A [`Router`] is one load balancer with its listeners and target
//! pools. Each listener forwards to exactly one pool at any instant;
//! rebinding a listener is the only way live traffic changes color.
//!
//! # Components
//!
//! - **`pool`** — health-checked target pools with revisioned membership
//! - **`listener`** — production and test listeners
//! - **`router`** — pool/listener registry with atomic rebind

pub mod error;
pub mod listener;
pub mod pool;
pub mod router;

pub use error::{RouterError, RouterResult};
pub use listener::{Listener, ListenerHandle, ListenerRole};
pub use pool::{Replica, TargetPool};
pub use router::{LoadBalancer, Router};
