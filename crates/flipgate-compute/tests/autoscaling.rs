use std::sync::Arc;

use flipgate_compute::{Autoscaler, ComputeManager, ScaleDecision, StaticCpu, TaskDefinition};
use flipgate_core::{Color, DeploymentContext, HealthCheckPolicy, ImageRef, TargetPoolId};
use flipgate_network::{BoundaryRole, SecurityPolicyGraph, SubnetPlanner, SubnetRole};
use flipgate_provision::{InMemoryBackend, Provisioner, RetryPolicy};
use flipgate_router::{LoadBalancer, Router};

#[tokio::test(start_paused = true)]
async fn tick_applies_decisions_through_the_manager() {
    let ctx = DeploymentContext::new("Dev", "1", "ap-northeast-1");
    let backend = Arc::new(InMemoryBackend::new());
    let provisioner = Provisioner::new(ctx.clone(), backend, RetryPolicy::default());
    let router = Router::create(
        provisioner.clone(),
        LoadBalancer {
            name: ctx.name("alb-internal"),
            internal: true,
            subnets: vec![],
            boundary: ctx.name("sg-internal"),
        },
    )
    .await
    .unwrap();
    let target = router
        .create_target_pool("backend", Color::Blue, 80, HealthCheckPolicy::default())
        .await
        .unwrap();
    let router = Arc::new(router);

    let plan = SubnetPlanner::plan("10.0.0.0/16".parse().unwrap(), 2, &ctx).unwrap();
    let security = SecurityPolicyGraph::standard(&ctx).unwrap();
    let manager = ComputeManager::new(provisioner);
    let handle = manager
        .register(
            TaskDefinition::new(&ctx, "backend", ImageRef::new("backend", "v1")),
            2,
            plan.group(SubnetRole::Container),
            security.boundary(BoundaryRole::Container).unwrap(),
            &router,
            &target,
        )
        .await
        .unwrap();
    manager.scale(&handle, 2, 4, 60.0).await.unwrap();

    let cpu = StaticCpu::default();
    cpu.set(&handle, 90.0);
    let mut scaler = Autoscaler::default();

    let decisions = scaler.tick(&manager, &cpu).await;
    assert_eq!(decisions, vec![(handle.clone(), ScaleDecision::ScaleTo(3))]);
    assert_eq!(manager.get(&handle).unwrap().replica_count(), 3);
    assert_eq!(
        router.endpoints(&TargetPoolId::new("backend", Color::Blue)).unwrap().len(),
        3
    );

    cpu.set(&handle, 1.0);
    let decisions = scaler.tick(&manager, &cpu).await;
    assert_eq!(decisions, vec![(handle.clone(), ScaleDecision::ScaleTo(2))]);
    assert_eq!(manager.get(&handle).unwrap().replica_count(), 2);
}
