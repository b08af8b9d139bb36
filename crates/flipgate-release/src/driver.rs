//! The per-release driver task.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{error, info, warn};

use flipgate_compute::ComputePoolHandle;
use flipgate_state::{ReleasePhase, ReleaseRecord};

use crate::error::{ReleaseError, ReleaseResult};
use crate::orchestrator::{Command, DeploymentGroup, Shared, epoch_secs};

pub(crate) struct Driver {
    shared: Arc<Shared>,
    group: Arc<DeploymentGroup>,
    record: ReleaseRecord,
    status: watch::Sender<ReleaseRecord>,
    commands: mpsc::Receiver<Command>,
    candidate: Option<ComputePoolHandle>,
}

impl Driver {
    pub fn new(
        shared: Arc<Shared>,
        group: Arc<DeploymentGroup>,
        record: ReleaseRecord,
        status: watch::Sender<ReleaseRecord>,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        Self {
            shared,
            group,
            record,
            status,
            commands,
            candidate: None,
        }
    }

    pub async fn run(mut self) {
        if let Err(e) = self.drive().await {
            self.fail(e).await;
        }
        self.finish();
    }

    async fn drive(&mut self) -> ReleaseResult<()> {
        self.register_candidate().await?;
        self.await_healthy().await?;
        self.shift_traffic().await?;
        if self.bake().await? {
            self.terminate_source().await;
        }
        Ok(())
    }

    // ── PENDING ────────────────────────────────────────────────────

    async fn register_candidate(&mut self) -> ReleaseResult<()> {
        let (group, shared) = (Arc::clone(&self.group), Arc::clone(&self.shared));
        let svc = &group.service;
        let compute = &shared.compute;

        // Match the live pool's current size, which autoscaling may have moved.
        let source = ComputePoolHandle {
            service: svc.name.clone(),
            revision: self.record.source_revision.clone(),
        };
        let desired = compute.get(&source).map_or(svc.desired, |p| p.desired);

        let task = svc.task.with_image(self.record.image.clone());
        let handle = compute
            .register(
                task,
                desired,
                &svc.subnets,
                &svc.boundary,
                &svc.router,
                &self.record.destination_pool,
            )
            .await?;
        self.candidate = Some(handle.clone());
        self.record.destination_revision = Some(handle.revision.clone());
        self.publish();

        if let Some(scaling) = svc.scaling {
            compute
                .scale(&handle, scaling.min, scaling.max, scaling.target_cpu_percent)
                .await?;
        }
        info!(release = %self.record.id, candidate = %handle, pool = %self.record.destination_pool, "candidate registered");
        Ok(())
    }

    /// Point the test listener at the candidate and wait for its health.
    async fn await_healthy(&mut self) -> ReleaseResult<()> {
        let group = Arc::clone(&self.group);
        let svc = &group.service;
        let destination = &self.record.destination_pool;

        let probed = match &svc.test {
            Some(test) => {
                svc.router.rebind(test, destination).await?;
                svc.router.forwarding_target(test)?
            }
            None => destination.clone(),
        };
        let endpoints = svc.router.endpoints(&probed)?;
        let rounds = self
            .shared
            .gate
            .wait_until_healthy(&probed.to_string(), &endpoints, &svc.health)
            .await?;
        info!(release = %self.record.id, pool = %probed, rounds, "candidate passed health checks");
        Ok(())
    }

    // ── TRAFFIC_SHIFTING ───────────────────────────────────────────

    async fn shift_traffic(&mut self) -> ReleaseResult<()> {
        self.enter(ReleasePhase::TrafficShifting);
        let group = Arc::clone(&self.group);
        let svc = &group.service;

        match svc
            .router
            .rebind(&svc.production, &self.record.destination_pool)
            .await
        {
            Ok(previous) => {
                group.state.lock().expect("group lock").live = self.record.destination_pool.color;
                info!(release = %self.record.id, from = %previous, to = %self.record.destination_pool, "production shifted");
                Ok(())
            }
            Err(shift) => {
                warn!(release = %self.record.id, error = %shift, "shift failed, reverting production");
                if let Err(revert) = svc.router.resync(&svc.production).await {
                    return Err(ReleaseError::RollbackFailed {
                        release: self.record.id.clone(),
                        reason: format!("shift failed ({shift}); revert failed: {revert}"),
                    });
                }
                Err(shift.into())
            }
        }
    }

    // ── BAKING ─────────────────────────────────────────────────────

    /// Returns true when the release completed, false when rolled back.
    async fn bake(&mut self) -> ReleaseResult<bool> {
        let wait = self.shared.settings.approval_wait;
        let deadline = Instant::now() + wait;
        self.record.approval_deadline = Some(epoch_secs() + wait.as_secs());
        self.enter(ReleasePhase::Baking);

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    info!(release = %self.record.id, "bake window elapsed");
                    break;
                }
                Some(command) = self.commands.recv() => match command {
                    Command::Approve(reply) => {
                        info!(release = %self.record.id, "release approved");
                        let _ = reply.send(Ok(()));
                        break;
                    }
                    Command::Rollback(reply) => {
                        return match self.rollback().await {
                            Ok(()) => {
                                let _ = reply.send(Ok(()));
                                Ok(false)
                            }
                            Err(reason) => {
                                let release = self.record.id.clone();
                                let _ = reply.send(Err(ReleaseError::RollbackFailed {
                                    release: release.clone(),
                                    reason: reason.clone(),
                                }));
                                Err(ReleaseError::RollbackFailed { release, reason })
                            }
                        };
                    }
                },
            }
        }

        self.complete();
        Ok(true)
    }

    async fn rollback(&mut self) -> Result<(), String> {
        let group = Arc::clone(&self.group);
        let svc = &group.service;
        let source = self.record.source_pool.clone();

        svc.router
            .rebind(&svc.production, &source)
            .await
            .map_err(|e| e.to_string())?;
        group.state.lock().expect("group lock").live = source.color;
        info!(release = %self.record.id, to = %source, "production rolled back");

        self.record.reason = Some("rolled back by operator".to_string());
        self.enter(ReleasePhase::RolledBack);
        self.close_commands();
        self.teardown_candidate().await;
        Ok(())
    }

    // ── COMPLETE ───────────────────────────────────────────────────

    fn complete(&mut self) {
        let wait = self.shared.settings.termination_wait;
        self.record.termination_deadline = Some(epoch_secs() + wait.as_secs());
        if let Some(candidate) = &self.candidate {
            self.group.state.lock().expect("group lock").live_pool = candidate.clone();
        }
        self.enter(ReleasePhase::Complete);
        self.close_commands();
    }

    /// Wait out the termination window, then remove the old pool.
    async fn terminate_source(&mut self) {
        tokio::time::sleep(self.shared.settings.termination_wait).await;

        let source = ComputePoolHandle {
            service: self.record.service.clone(),
            revision: self.record.source_revision.clone(),
        };
        match self.shared.compute.teardown(&source).await {
            Ok(()) => info!(release = %self.record.id, pool = %source, "old pool torn down"),
            Err(e) => {
                warn!(release = %self.record.id, pool = %source, error = %e, "old pool teardown failed");
                self.record.reason = Some(format!("old pool teardown failed: {e}"));
                self.publish();
            }
        }
    }

    // ── FAILED ─────────────────────────────────────────────────────

    async fn fail(&mut self, err: ReleaseError) {
        let fatal = matches!(err, ReleaseError::RollbackFailed { .. });
        if fatal {
            error!(release = %self.record.id, error = %err, "rollback failed; production left as the router reports it");
            let svc = &self.group.service;
            if let Ok(target) = svc.router.forwarding_target(&svc.production) {
                let mut state = self.group.state.lock().expect("group lock");
                state.live = target.color;
                if target == self.record.destination_pool
                    && let Some(candidate) = &self.candidate
                {
                    state.live_pool = candidate.clone();
                }
            }
        } else {
            warn!(release = %self.record.id, phase = %self.record.phase, error = %err, "release failed");
            self.teardown_candidate().await;
        }

        self.record.reason = Some(err.to_string());
        self.enter(ReleasePhase::Failed);
    }

    async fn teardown_candidate(&mut self) {
        let Some(candidate) = self.candidate.take() else {
            return;
        };
        match self.shared.compute.teardown(&candidate).await {
            Ok(()) => info!(release = %self.record.id, pool = %candidate, "candidate torn down"),
            Err(e) => warn!(release = %self.record.id, pool = %candidate, error = %e, "candidate teardown failed"),
        }
    }

    // ── Bookkeeping ────────────────────────────────────────────────

    fn enter(&mut self, next: ReleasePhase) {
        let from = self.record.phase;
        if !from.can_transition_to(next) {
            error!(release = %self.record.id, %from, to = %next, "illegal phase transition ignored");
            return;
        }
        self.record.phase = next;
        self.publish();
        info!(release = %self.record.id, %from, to = %next, "phase changed");
    }

    /// Persist the record and notify watchers.
    fn publish(&mut self) {
        self.record.updated_at = epoch_secs();
        if let Err(e) = self.shared.store.put_release(&self.record) {
            error!(release = %self.record.id, error = %e, "failed to persist release");
        }
        self.status.send_replace(self.record.clone());
    }

    /// Refuse operator commands from here on.
    fn close_commands(&mut self) {
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            let invalid = ReleaseError::InvalidState {
                release: self.record.id.clone(),
                phase: self.record.phase,
                action: match command {
                    Command::Approve(_) => "approve",
                    Command::Rollback(_) => "roll back",
                },
            };
            match command {
                Command::Approve(reply) | Command::Rollback(reply) => {
                    let _ = reply.send(Err(invalid));
                }
            }
        }
    }

    /// Archive the record and free the service's release slot.
    fn finish(&mut self) {
        self.close_commands();
        let now = epoch_secs();
        self.record.archived_at = Some(now);
        self.record.updated_at = now;
        if let Err(e) = self.shared.store.archive_release(&self.record) {
            error!(release = %self.record.id, error = %e, "failed to archive release");
        }
        self.status.send_replace(self.record.clone());
        self.shared.forget(&self.record.id);
        self.group.state.lock().expect("group lock").active = None;
        info!(release = %self.record.id, phase = %self.record.phase, "release archived");
    }
}
