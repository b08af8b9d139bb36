//! flipgate-state — embedded state store for Flipgate.
//!
//! Backed by [redb](https://docs.rs/redb), persists release records while
//! they are in flight, the archive of finished releases, and the handles
//! of every resource the provisioner created.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Archived releases are keyed `{service}:{release_id}` so a service's
//! history is a prefix scan.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
