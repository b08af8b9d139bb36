//! flipgate-provision — talking to the provisioning backend.
//!
//! Every resource Flipgate creates goes through a [`ProvisioningBackend`]:
//! an idempotent, eventually-consistent, asynchronous API. The
//! [`Provisioner`] wraps it with request tokens, bounded retries, and
//! readiness polling, and records each handle in the state store.
//!
//! # Components
//!
//! - **`backend`** — backend contract and resource handles
//! - **`memory`** — in-memory backend with fault injection
//! - **`retry`** — bounded exponential backoff
//! - **`provisioner`** — create/update/destroy with await-ready
//! - **`graph`** — dependency graph with topological build order

pub mod backend;
pub mod error;
pub mod graph;
pub mod memory;
pub mod provisioner;
pub mod retry;

pub use backend::{BackendError, ProvisioningBackend, RequestToken, ResourceHandle};
pub use error::{GraphError, ProvisionError, ProvisionResult};
pub use graph::ResourceGraph;
pub use memory::InMemoryBackend;
pub use provisioner::Provisioner;
pub use retry::RetryPolicy;
