//! Domain types for the Flipgate state store.

use serde::{Deserialize, Serialize};

use flipgate_core::{ImageRef, ResourceKind, TargetPoolId};

/// Unique identifier for a release attempt.
pub type ReleaseId = String;

// ── Release ───────────────────────────────────────────────────────

/// Phase of a blue/green release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleasePhase {
    /// Candidate registered to the idle pool, awaiting health.
    Pending,
    /// Production listener is being rebound to the candidate.
    TrafficShifting,
    /// Candidate is live; old color held for rollback.
    Baking,
    /// Candidate accepted; old color awaiting teardown.
    Complete,
    /// Production reverted to the old color.
    RolledBack,
    /// Release aborted; old color remains production.
    Failed,
}

impl ReleasePhase {
    /// Phases that hold the per-service release slot.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ReleasePhase::Pending | ReleasePhase::TrafficShifting | ReleasePhase::Baking
        )
    }

    /// Phases with no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReleasePhase::Complete | ReleasePhase::RolledBack | ReleasePhase::Failed
        )
    }

    /// Whether the state machine permits `self → next`.
    pub fn can_transition_to(self, next: ReleasePhase) -> bool {
        use ReleasePhase::*;
        matches!(
            (self, next),
            (Pending, TrafficShifting)
                | (Pending, Failed)
                | (TrafficShifting, Baking)
                | (TrafficShifting, Failed)
                | (Baking, Complete)
                | (Baking, RolledBack)
                | (Baking, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReleasePhase::Pending => "PENDING",
            ReleasePhase::TrafficShifting => "TRAFFIC_SHIFTING",
            ReleasePhase::Baking => "BAKING",
            ReleasePhase::Complete => "COMPLETE",
            ReleasePhase::RolledBack => "ROLLED_BACK",
            ReleasePhase::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for ReleasePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted state of one release attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseRecord {
    pub id: ReleaseId,
    pub service: String,
    pub image: ImageRef,
    /// Pool bound to production when the release started.
    pub source_pool: TargetPoolId,
    /// Idle pool the candidate registers into.
    pub destination_pool: TargetPoolId,
    /// Compute pool revision serving the source pool.
    pub source_revision: String,
    /// Compute pool revision of the candidate, once registered.
    pub destination_revision: Option<String>,
    pub phase: ReleasePhase,
    /// Unix timestamp when the release was submitted.
    pub started_at: u64,
    /// Unix timestamp when the bake window ends.
    pub approval_deadline: Option<u64>,
    /// Unix timestamp when the old color is torn down.
    pub termination_deadline: Option<u64>,
    /// Unix timestamp of the last phase change.
    pub updated_at: u64,
    /// Set once the release has been moved to the archive.
    pub archived_at: Option<u64>,
    /// Why the release failed or rolled back.
    pub reason: Option<String>,
}

impl ReleaseRecord {
    /// Build the composite key for the archive table.
    pub fn archive_key(&self) -> String {
        format!("{}:{}", self.service, self.id)
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

// ── Resources ─────────────────────────────────────────────────────

/// Readiness reported by the provisioning backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Pending,
    Ready,
    Failed,
    Deleted,
}

/// A resource created through the provisioning backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRecord {
    pub logical_name: String,
    pub kind: ResourceKind,
    /// Backend-assigned handle.
    pub handle: String,
    pub status: ResourceStatus,
    pub updated_at: u64,
}
