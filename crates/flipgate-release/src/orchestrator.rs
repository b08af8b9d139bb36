//! ReleaseOrchestrator: accepts releases and operator commands.
//!
//! Submission takes the service's release slot synchronously, so a second
//! request for the same service fails fast with `ReleaseInProgress`. The
//! slot is released only once the release has been archived.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

use flipgate_compute::{ComputeManager, ComputePoolHandle};
use flipgate_core::{Color, ImageRef, TargetPoolId};
use flipgate_health::HealthGate;
use flipgate_state::{ReleasePhase, ReleaseRecord, StateStore};
use flipgate_topology::{ServiceTopology, Topology};

use crate::driver::Driver;
use crate::error::{ReleaseError, ReleaseResult};
use crate::settings::ReleaseSettings;

/// Returned by `submit_release`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReleaseHandle {
    pub id: String,
    pub service: String,
}

pub(crate) enum Command {
    Approve(oneshot::Sender<ReleaseResult<()>>),
    Rollback(oneshot::Sender<ReleaseResult<()>>),
}

/// Live color and release slot of one service.
pub(crate) struct GroupState {
    pub live: Color,
    pub live_pool: ComputePoolHandle,
    pub active: Option<String>,
}

/// A service under blue/green control.
pub(crate) struct DeploymentGroup {
    pub service: ServiceTopology,
    pub state: Mutex<GroupState>,
}

impl DeploymentGroup {
    pub fn pool_id(&self, color: Color) -> TargetPoolId {
        self.service.pool_id(color)
    }
}

/// Handles to a release whose driver is still running.
struct ReleaseSlot {
    status: watch::Receiver<ReleaseRecord>,
    commands: mpsc::Sender<Command>,
}

pub(crate) struct Shared {
    pub compute: Arc<ComputeManager>,
    pub gate: HealthGate,
    pub settings: ReleaseSettings,
    pub store: StateStore,
    slots: RwLock<HashMap<String, ReleaseSlot>>,
}

impl Shared {
    /// Drop the in-memory slot once the record is archived.
    pub fn forget(&self, id: &str) {
        self.slots.write().expect("release slots lock").remove(id);
    }
}

#[derive(Clone)]
pub struct ReleaseOrchestrator {
    shared: Arc<Shared>,
    groups: Arc<HashMap<String, Arc<DeploymentGroup>>>,
    seq: Arc<AtomicU64>,
}

impl ReleaseOrchestrator {
    /// One deployment group per service of `topology`, each live on the
    /// color its production listener forwards to.
    pub fn new(
        topology: &Topology,
        gate: HealthGate,
        settings: ReleaseSettings,
        store: StateStore,
    ) -> ReleaseResult<Self> {
        let mut groups = HashMap::new();
        for (name, service) in &topology.services {
            let live = service.router.forwarding_target(&service.production)?.color;
            groups.insert(
                name.clone(),
                Arc::new(DeploymentGroup {
                    service: service.clone(),
                    state: Mutex::new(GroupState {
                        live,
                        live_pool: service.initial_pool.clone(),
                        active: None,
                    }),
                }),
            );
        }

        // Continue numbering after every release the store has seen.
        let mut seq = 0;
        for name in groups.keys() {
            for record in store.list_archived(name)? {
                seq = seq.max(release_seq(&record.id));
            }
        }

        // No driver survives a restart; whatever was in flight is over.
        let now = epoch_secs();
        for mut record in store.list_releases()? {
            seq = seq.max(release_seq(&record.id));
            if record.phase.can_transition_to(ReleasePhase::Failed) {
                record.phase = ReleasePhase::Failed;
                record.reason = Some("interrupted by restart".to_string());
            }
            record.updated_at = now;
            record.archived_at = Some(now);
            store.archive_release(&record)?;
            warn!(release = %record.id, phase = %record.phase, "stale in-flight release archived");
        }

        Ok(Self {
            shared: Arc::new(Shared {
                compute: Arc::clone(&topology.compute),
                gate,
                settings,
                store,
                slots: RwLock::new(HashMap::new()),
            }),
            groups: Arc::new(groups),
            seq: Arc::new(AtomicU64::new(seq)),
        })
    }

    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<_> = self.groups.keys().cloned().collect();
        names.sort();
        names
    }

    /// The color the service's production listener is bound to.
    pub fn live_color(&self, service: &str) -> ReleaseResult<Color> {
        Ok(self.group(service)?.state.lock().expect("group lock").live)
    }

    /// Start a release of `image` for `service`.
    pub fn submit_release(&self, service: &str, image: ImageRef) -> ReleaseResult<ReleaseHandle> {
        let group = self.group(service)?;

        let (id, live, live_pool) = {
            let mut state = group.state.lock().expect("group lock");
            if let Some(active) = &state.active {
                return Err(ReleaseError::ReleaseInProgress {
                    service: service.to_string(),
                    active: active.clone(),
                });
            }
            let id = format!("{service}-r{}", self.seq.fetch_add(1, Ordering::SeqCst) + 1);
            state.active = Some(id.clone());
            (id, state.live, state.live_pool.clone())
        };

        let now = epoch_secs();
        let record = ReleaseRecord {
            id: id.clone(),
            service: service.to_string(),
            image,
            source_pool: group.pool_id(live),
            destination_pool: group.pool_id(live.other()),
            source_revision: live_pool.revision,
            destination_revision: None,
            phase: ReleasePhase::Pending,
            started_at: now,
            approval_deadline: None,
            termination_deadline: None,
            updated_at: now,
            archived_at: None,
            reason: None,
        };
        if let Err(e) = self.shared.store.put_release(&record) {
            group.state.lock().expect("group lock").active = None;
            return Err(e.into());
        }

        let (status_tx, status_rx) = watch::channel(record.clone());
        let (command_tx, command_rx) = mpsc::channel(8);
        self.shared.slots.write().expect("release slots lock").insert(
            id.clone(),
            ReleaseSlot {
                status: status_rx,
                commands: command_tx,
            },
        );

        info!(release = %id, %service, image = %record.image, from = %record.source_pool, to = %record.destination_pool, "release submitted");
        let driver = Driver::new(
            Arc::clone(&self.shared),
            Arc::clone(&group),
            record,
            status_tx,
            command_rx,
        );
        tokio::spawn(driver.run());

        Ok(ReleaseHandle {
            id,
            service: service.to_string(),
        })
    }

    /// Current record of a release, in flight or archived.
    pub fn get_release_status(&self, id: &str) -> ReleaseResult<ReleaseRecord> {
        if let Some(slot) = self.shared.slots.read().expect("release slots lock").get(id) {
            return Ok(slot.status.borrow().clone());
        }
        self.shared
            .store
            .find_release(id)?
            .ok_or_else(|| ReleaseError::UnknownRelease(id.to_string()))
    }

    /// Subscribe to phase changes of an in-flight release.
    pub fn watch_release(&self, id: &str) -> Option<watch::Receiver<ReleaseRecord>> {
        self.shared
            .slots
            .read()
            .expect("release slots lock")
            .get(id)
            .map(|s| s.status.clone())
    }

    /// In-flight and archived releases of a service, oldest first.
    pub fn list_releases(&self, service: &str) -> ReleaseResult<Vec<ReleaseRecord>> {
        self.group(service)?;
        let mut records = self.shared.store.list_archived(service)?;
        let archived: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        for record in self.shared.store.list_releases()? {
            if record.service == service && !archived.contains(&record.id) {
                records.push(record);
            }
        }
        records.sort_by_key(|r| (r.started_at, release_seq(&r.id)));
        Ok(records)
    }

    /// End the bake early and complete the release.
    pub async fn approve_release(&self, id: &str) -> ReleaseResult<()> {
        self.command(id, "approve", Command::Approve).await
    }

    /// Revert production to the previous color.
    pub async fn rollback_release(&self, id: &str) -> ReleaseResult<()> {
        self.command(id, "roll back", Command::Rollback).await
    }

    async fn command(
        &self,
        id: &str,
        action: &'static str,
        make: fn(oneshot::Sender<ReleaseResult<()>>) -> Command,
    ) -> ReleaseResult<()> {
        let slot = self
            .shared
            .slots
            .read()
            .expect("release slots lock")
            .get(id)
            .map(|s| (s.status.borrow().phase, s.commands.clone()));
        let (phase, commands) = match slot {
            Some(slot) => slot,
            None => {
                let record = self.get_release_status(id)?;
                return Err(self.invalid(id, record.phase, action));
            }
        };
        if phase != ReleasePhase::Baking {
            return Err(self.invalid(id, phase, action));
        }

        let (reply, response) = oneshot::channel();
        if commands.send(make(reply)).await.is_err() {
            return Err(self.invalid(id, self.current_phase(id), action));
        }
        match response.await {
            Ok(result) => result,
            Err(_) => Err(self.invalid(id, self.current_phase(id), action)),
        }
    }

    fn current_phase(&self, id: &str) -> ReleasePhase {
        self.get_release_status(id)
            .map(|r| r.phase)
            .unwrap_or(ReleasePhase::Failed)
    }

    fn invalid(&self, id: &str, phase: ReleasePhase, action: &'static str) -> ReleaseError {
        ReleaseError::InvalidState {
            release: id.to_string(),
            phase,
            action,
        }
    }

    fn group(&self, service: &str) -> ReleaseResult<Arc<DeploymentGroup>> {
        self.groups
            .get(service)
            .cloned()
            .ok_or_else(|| ReleaseError::UnknownService(service.to_string()))
    }
}

fn release_seq(id: &str) -> u64 {
    id.rsplit_once("-r")
        .and_then(|(_, n)| n.parse().ok())
        .unwrap_or(0)
}

pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
