//! flipgate-release — blue/green releases.
//!
//! Each release is driven by one task through
//! `PENDING → TRAFFIC_SHIFTING → BAKING → {COMPLETE, ROLLED_BACK}`, or
//! `FAILED` from any non-terminal phase, and is archived afterwards.
//! Only one release per service holds the release slot at a time.
//!
//! # Components
//!
//! - **`settings`** — bake and termination waits, health gate budget
//! - **`orchestrator`** — submission, status, operator commands
//! - **`driver`** — the per-release task walking the phases

mod driver;
pub mod error;
pub mod orchestrator;
pub mod settings;

pub use error::{ReleaseError, ReleaseResult};
pub use orchestrator::{ReleaseHandle, ReleaseOrchestrator};
pub use settings::ReleaseSettings;
