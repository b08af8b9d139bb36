use std::sync::Arc;
use std::time::Duration;

use flipgate_core::{Color, DeploymentContext, FlipgateConfig, ImageRef, TargetPoolId};
use flipgate_health::{ProbeResult, ScriptedProber};
use flipgate_provision::{InMemoryBackend, Provisioner, ResourceHandle, RetryPolicy};
use flipgate_release::{ReleaseError, ReleaseOrchestrator, ReleaseSettings};
use flipgate_state::{ReleasePhase, ReleaseRecord, StateStore};
use flipgate_topology::{Topology, TopologyBuilder};

struct Harness {
    backend: Arc<InMemoryBackend>,
    prober: Arc<ScriptedProber>,
    topology: Topology,
    releases: ReleaseOrchestrator,
}

impl Harness {
    async fn new(settings: ReleaseSettings) -> Self {
        Self::with_store(settings, StateStore::open_in_memory().unwrap()).await
    }

    async fn with_store(settings: ReleaseSettings, store: StateStore) -> Self {
        let backend = Arc::new(InMemoryBackend::new());
        let provisioner = Provisioner::new(
            DeploymentContext::new("Dev", "000000000000", "ap-northeast-1"),
            backend.clone(),
            RetryPolicy::default(),
        );
        let topology = TopologyBuilder::from_config(provisioner, &FlipgateConfig::scaffold("Dev"))
            .unwrap()
            .build()
            .await
            .unwrap();
        let prober = Arc::new(ScriptedProber::healthy());
        let gate = settings.health_gate(prober.clone());
        let releases = ReleaseOrchestrator::new(&topology, gate, settings, store).unwrap();
        Self {
            backend,
            prober,
            topology,
            releases,
        }
    }

    fn production_handle(&self, service: &str) -> ResourceHandle {
        let svc = self.topology.service(service).unwrap();
        svc.router
            .listener(svc.production.port)
            .unwrap()
            .handle
            .unwrap()
    }

    fn replicas(&self, service: &str, color: Color) -> usize {
        let svc = self.topology.service(service).unwrap();
        svc.router.endpoints(&svc.pool_id(color)).unwrap().len()
    }

    fn production_color(&self, service: &str) -> Color {
        let svc = self.topology.service(service).unwrap();
        svc.router.forwarding_target(&svc.production).unwrap().color
    }
}

async fn advance(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

fn image(tag: &str) -> ImageRef {
    ImageRef::new("backend", tag)
}

#[tokio::test(start_paused = true)]
async fn release_bakes_completes_and_retires_old_color() {
    let h = Harness::new(ReleaseSettings::default()).await;
    let release = h.releases.submit_release("backend", image("v2")).unwrap();
    assert_eq!(release.id, "backend-r1");

    // Three healthy rounds, 15s apart.
    advance(29).await;
    let status = h.releases.get_release_status(&release.id).unwrap();
    assert_eq!(status.phase, ReleasePhase::Pending);
    assert_eq!(h.production_color("backend"), Color::Blue);
    assert!(status.destination_revision.as_deref().unwrap().starts_with("backend-green-"));
    assert_eq!(h.replicas("backend", Color::Green), 2);

    advance(2).await;
    let status = h.releases.get_release_status(&release.id).unwrap();
    assert_eq!(status.phase, ReleasePhase::Baking);
    assert!(status.approval_deadline.is_some());
    assert_eq!(h.production_color("backend"), Color::Green);
    assert_eq!(h.releases.live_color("backend").unwrap(), Color::Green);

    advance(598).await;
    assert_eq!(
        h.releases.get_release_status(&release.id).unwrap().phase,
        ReleasePhase::Baking
    );

    advance(2).await;
    let status = h.releases.get_release_status(&release.id).unwrap();
    assert_eq!(status.phase, ReleasePhase::Complete);
    assert!(status.termination_deadline.is_some());
    assert!(status.archived_at.is_none());
    // The old color lingers through the termination wait.
    assert_eq!(h.replicas("backend", Color::Blue), 2);

    advance(69 * 60).await;
    assert_eq!(h.replicas("backend", Color::Blue), 2);

    advance(2).await;
    let status = h.releases.get_release_status(&release.id).unwrap();
    assert_eq!(status.phase, ReleasePhase::Complete);
    assert!(status.archived_at.is_some());
    assert_eq!(h.replicas("backend", Color::Blue), 0);
    assert_eq!(h.replicas("backend", Color::Green), 2);

    let history = h.releases.list_releases("backend").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, "backend-r1");
}

#[tokio::test(start_paused = true)]
async fn next_release_targets_the_other_color() {
    let h = Harness::new(ReleaseSettings::default()).await;
    let first = h.releases.submit_release("backend", image("v2")).unwrap();
    advance(31).await;
    h.releases.approve_release(&first.id).await.unwrap();
    advance(69 * 60 + 1).await;
    assert!(h.releases.get_release_status(&first.id).unwrap().archived_at.is_some());

    let second = h.releases.submit_release("backend", image("v3")).unwrap();
    assert_eq!(second.id, "backend-r2");
    let status = h.releases.get_release_status(&second.id).unwrap();
    assert_eq!(status.source_pool.color, Color::Green);
    assert_eq!(status.destination_pool.color, Color::Blue);

    advance(31).await;
    assert_eq!(h.production_color("backend"), Color::Blue);
    assert_eq!(h.releases.list_releases("backend").unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn approve_skips_the_rest_of_the_bake() {
    let h = Harness::new(ReleaseSettings::default()).await;
    let release = h.releases.submit_release("frontend", ImageRef::new("frontend", "v2")).unwrap();
    advance(31).await;

    h.releases.approve_release(&release.id).await.unwrap();
    assert_eq!(
        h.releases.get_release_status(&release.id).unwrap().phase,
        ReleasePhase::Complete
    );
    assert_eq!(h.production_color("frontend"), Color::Green);
}

#[tokio::test(start_paused = true)]
async fn rollback_during_bake_restores_previous_color() {
    let h = Harness::new(ReleaseSettings::default()).await;
    let release = h.releases.submit_release("backend", image("v2")).unwrap();
    advance(31 + 120).await;
    assert_eq!(h.production_color("backend"), Color::Green);

    h.releases.rollback_release(&release.id).await.unwrap();
    assert_eq!(h.production_color("backend"), Color::Blue);
    assert_eq!(h.releases.live_color("backend").unwrap(), Color::Blue);
    assert_eq!(h.replicas("backend", Color::Green), 0);
    assert_eq!(h.replicas("backend", Color::Blue), 2);

    advance(1).await;
    let status = h.releases.get_release_status(&release.id).unwrap();
    assert_eq!(status.phase, ReleasePhase::RolledBack);
    assert!(status.archived_at.is_some());

    // The slot is free again right away.
    assert!(h.releases.submit_release("backend", image("v3")).is_ok());
}

#[tokio::test(start_paused = true)]
async fn unhealthy_candidate_fails_without_touching_production() {
    let settings = ReleaseSettings {
        health_max_rounds: 3,
        ..ReleaseSettings::default()
    };
    let h = Harness::new(settings).await;
    h.prober.set_fallback(ProbeResult::Unhealthy);
    let production_updates = h.backend.update_count(&h.production_handle("backend"));

    let release = h.releases.submit_release("backend", image("broken")).unwrap();
    advance(31).await;

    let status = h.releases.get_release_status(&release.id).unwrap();
    assert_eq!(status.phase, ReleasePhase::Failed);
    assert!(status.reason.unwrap().contains("unhealthy"));
    assert!(status.archived_at.is_some());
    assert_eq!(h.production_color("backend"), Color::Blue);
    assert_eq!(h.backend.update_count(&h.production_handle("backend")), production_updates);
    assert_eq!(h.replicas("backend", Color::Green), 0);
    assert_eq!(h.topology.compute.pools_in(&h.topology.service("backend").unwrap().pool_id(Color::Green)).len(), 0);
}

#[tokio::test(start_paused = true)]
async fn one_release_per_service_at_a_time() {
    let h = Harness::new(ReleaseSettings::default()).await;
    let first = h.releases.submit_release("backend", image("v2")).unwrap();

    let err = h.releases.submit_release("backend", image("v3")).unwrap_err();
    assert!(matches!(
        err,
        ReleaseError::ReleaseInProgress { ref active, .. } if *active == first.id
    ));
    // Other services are independent.
    assert!(h.releases.submit_release("frontend", ImageRef::new("frontend", "v2")).is_ok());

    // Still held through the termination wait.
    advance(31).await;
    h.releases.approve_release(&first.id).await.unwrap();
    advance(60).await;
    assert!(matches!(
        h.releases.submit_release("backend", image("v3")),
        Err(ReleaseError::ReleaseInProgress { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn second_submit_while_baking_leaves_release_untouched() {
    let h = Harness::new(ReleaseSettings::default()).await;
    let first = h.releases.submit_release("backend", image("v2")).unwrap();
    advance(31).await;

    let before = h.releases.get_release_status(&first.id).unwrap();
    assert_eq!(before.phase, ReleasePhase::Baking);
    let production_updates = h.backend.update_count(&h.production_handle("backend"));

    let err = h.releases.submit_release("backend", image("v3")).unwrap_err();
    assert!(matches!(
        err,
        ReleaseError::ReleaseInProgress { ref active, .. } if *active == first.id
    ));

    let after = h.releases.get_release_status(&first.id).unwrap();
    assert_eq!(after.phase, ReleasePhase::Baking);
    assert_eq!(after.image, before.image);
    assert_eq!(after.destination_pool, before.destination_pool);
    assert_eq!(after.destination_revision, before.destination_revision);
    assert_eq!(after.approval_deadline, before.approval_deadline);
    assert_eq!(after.updated_at, before.updated_at);
    assert_eq!(h.production_color("backend"), Color::Green);
    assert_eq!(h.backend.update_count(&h.production_handle("backend")), production_updates);
    assert_eq!(h.replicas("backend", Color::Green), 2);
    assert_eq!(h.releases.list_releases("backend").unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn commands_outside_bake_are_invalid() {
    let h = Harness::new(ReleaseSettings::default()).await;
    let release = h.releases.submit_release("backend", image("v2")).unwrap();

    let err = h.releases.approve_release(&release.id).await.unwrap_err();
    assert!(matches!(
        err,
        ReleaseError::InvalidState {
            phase: ReleasePhase::Pending,
            ..
        }
    ));

    advance(31).await;
    h.releases.approve_release(&release.id).await.unwrap();
    let err = h.releases.rollback_release(&release.id).await.unwrap_err();
    assert!(matches!(
        err,
        ReleaseError::InvalidState {
            phase: ReleasePhase::Complete,
            ..
        }
    ));
    assert_eq!(h.production_color("backend"), Color::Green);

    assert!(matches!(
        h.releases.approve_release("backend-r99").await,
        Err(ReleaseError::UnknownRelease(_))
    ));
    assert!(matches!(
        h.releases.submit_release("worker", image("v1")),
        Err(ReleaseError::UnknownService(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn failed_shift_is_reverted() {
    let h = Harness::new(ReleaseSettings::default()).await;
    // Enough transient failures to exhaust the shift's retry budget.
    h.backend.fail_updates(&h.production_handle("backend"), 5);

    let release = h.releases.submit_release("backend", image("v2")).unwrap();
    advance(5 * 60).await;

    let status = h.releases.get_release_status(&release.id).unwrap();
    assert_eq!(status.phase, ReleasePhase::Failed);
    assert!(status.archived_at.is_some());
    assert_eq!(h.production_color("backend"), Color::Blue);
    assert_eq!(h.releases.live_color("backend").unwrap(), Color::Blue);
    assert_eq!(h.replicas("backend", Color::Green), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_revert_keeps_candidate() {
    let h = Harness::new(ReleaseSettings::default()).await;
    h.backend.reject_updates(&h.production_handle("backend"));

    let release = h.releases.submit_release("backend", image("v2")).unwrap();
    advance(5 * 60).await;

    let status = h.releases.get_release_status(&release.id).unwrap();
    assert_eq!(status.phase, ReleasePhase::Failed);
    assert!(status.reason.unwrap().contains("revert failed"));
    assert_eq!(h.releases.live_color("backend").unwrap(), Color::Blue);
    assert_eq!(h.replicas("backend", Color::Green), 2);
}

#[tokio::test(start_paused = true)]
async fn rejected_rollback_fails_the_release() {
    let h = Harness::new(ReleaseSettings::default()).await;
    let release = h.releases.submit_release("backend", image("v2")).unwrap();
    advance(31).await;
    h.backend.reject_updates(&h.production_handle("backend"));

    let err = h.releases.rollback_release(&release.id).await.unwrap_err();
    assert!(matches!(err, ReleaseError::RollbackFailed { .. }));

    advance(1).await;
    let status = h.releases.get_release_status(&release.id).unwrap();
    assert_eq!(status.phase, ReleasePhase::Failed);
    // Production stays where the router left it.
    assert_eq!(h.releases.live_color("backend").unwrap(), Color::Green);
    assert_eq!(h.replicas("backend", Color::Green), 2);
}

#[tokio::test(start_paused = true)]
async fn watchers_see_every_phase() {
    let h = Harness::new(ReleaseSettings::default()).await;
    let release = h.releases.submit_release("backend", image("v2")).unwrap();
    let mut status = h.releases.watch_release(&release.id).unwrap();

    status
        .wait_for(|r| r.phase == ReleasePhase::Baking)
        .await
        .unwrap();
    h.releases.approve_release(&release.id).await.unwrap();
    status
        .wait_for(|r| r.archived_at.is_some())
        .await
        .unwrap();
    assert_eq!(status.borrow().phase, ReleasePhase::Complete);
    assert!(h.releases.watch_release(&release.id).is_none());
}

#[tokio::test(start_paused = true)]
async fn restart_fails_stale_releases_and_keeps_numbering() {
    let store = StateStore::open_in_memory().unwrap();
    let stale = ReleaseRecord {
        id: "backend-r4".to_string(),
        service: "backend".to_string(),
        image: image("v2"),
        source_pool: TargetPoolId::new("backend", Color::Blue),
        destination_pool: TargetPoolId::new("backend", Color::Green),
        source_revision: "backend-blue-1".to_string(),
        destination_revision: Some("backend-green-7".to_string()),
        phase: ReleasePhase::Baking,
        started_at: 1000,
        approval_deadline: Some(1600),
        termination_deadline: None,
        updated_at: 1000,
        archived_at: None,
        reason: None,
    };
    store.put_release(&stale).unwrap();

    let h = Harness::with_store(ReleaseSettings::default(), store.clone()).await;
    assert!(store.list_releases().unwrap().is_empty());
    let status = h.releases.get_release_status("backend-r4").unwrap();
    assert_eq!(status.phase, ReleasePhase::Failed);
    assert!(status.archived_at.is_some());
    assert!(status.reason.unwrap().contains("restart"));

    let next = h.releases.submit_release("backend", image("v3")).unwrap();
    assert_eq!(next.id, "backend-r5");
    let history = h.releases.list_releases("backend").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, "backend-r4");
}
