use std::sync::Arc;
use std::time::Duration;

use flipgate_core::{Color, DeploymentContext, FlipgateConfig, Protocol, ResourceKind, TargetPoolId};
use flipgate_network::{RouteTarget, SubnetRole};
use flipgate_provision::{InMemoryBackend, ProvisionError, Provisioner, RetryPolicy};
use flipgate_topology::{BuildStage, TopologyBuilder, TopologyError};

fn provisioner(backend: Arc<InMemoryBackend>, policy: RetryPolicy) -> Provisioner {
    Provisioner::new(
        DeploymentContext::new("Dev", "000000000000", "ap-northeast-1"),
        backend,
        policy,
    )
}

#[tokio::test(start_paused = true)]
async fn scaffold_builds_in_dependency_order() {
    let backend = Arc::new(InMemoryBackend::new().with_settle_after(1));
    let cfg = FlipgateConfig::scaffold("Dev");
    let topology = TopologyBuilder::from_config(provisioner(backend.clone(), RetryPolicy::default()), &cfg)
        .unwrap()
        .build()
        .await
        .unwrap();

    assert_eq!(topology.stages.first(), Some(&BuildStage::Network));
    assert_eq!(topology.stages.last(), Some(&BuildStage::Compute));

    assert_eq!(backend.count(ResourceKind::VirtualNetwork), 1);
    assert_eq!(backend.count(ResourceKind::InternetGateway), 1);
    assert_eq!(backend.count(ResourceKind::Subnet), 10);
    assert_eq!(backend.count(ResourceKind::SecurityGroup), 7);
    assert_eq!(backend.count(ResourceKind::RouteTable), 5);
    assert_eq!(backend.count(ResourceKind::Endpoint), 4);
    assert_eq!(backend.count(ResourceKind::LoadBalancer), 2);
    assert_eq!(backend.count(ResourceKind::TargetGroup), 4);
    assert_eq!(backend.count(ResourceKind::Listener), 3);
    assert_eq!(backend.count(ResourceKind::TaskDefinition), 2);
    assert_eq!(backend.count(ResourceKind::ComputeService), 2);
}

#[tokio::test(start_paused = true)]
async fn routers_start_on_blue_with_green_behind_test_listener() {
    let backend = Arc::new(InMemoryBackend::new());
    let cfg = FlipgateConfig::scaffold("Dev");
    let topology = TopologyBuilder::from_config(provisioner(backend, RetryPolicy::default()), &cfg)
        .unwrap()
        .build()
        .await
        .unwrap();

    let frontend = topology.service("frontend").unwrap();
    assert_eq!(frontend.router.name(), "Dev-alb-ingress-frontend");
    assert!(!frontend.router.is_internal());
    assert!(frontend.test.is_none());
    assert_eq!(
        frontend.router.forwarding_target(&frontend.production).unwrap(),
        TargetPoolId::new("frontend", Color::Blue)
    );

    let backend_svc = topology.service("backend").unwrap();
    assert_eq!(backend_svc.router.name(), "Dev-alb-internal");
    assert_eq!(backend_svc.production.port, 80);
    let test = backend_svc.test.as_ref().unwrap();
    assert_eq!(test.port, 10080);
    assert_eq!(
        backend_svc.router.forwarding_target(test).unwrap(),
        TargetPoolId::new("backend", Color::Green)
    );

    for svc in [frontend, backend_svc] {
        assert!(svc.router.listeners().iter().all(|l| l.protocol == Protocol::Http));
    }

    // Scaffold asks for 2 backend replicas and 1 frontend replica, all in blue.
    let blue = backend_svc.router.pool(&backend_svc.pool_id(Color::Blue)).unwrap();
    assert_eq!(blue.replicas.len(), 2);
    assert!(blue.replicas.iter().all(|r| r.address.starts_with("10.0.8.") || r.address.starts_with("10.0.9.")));
    assert!(backend_svc.router.pool(&backend_svc.pool_id(Color::Green)).unwrap().is_empty());
    assert_eq!(
        frontend.router.endpoints(&frontend.pool_id(Color::Blue)).unwrap().len(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn container_table_reaches_object_storage_without_default_route() {
    let backend = Arc::new(InMemoryBackend::new());
    let cfg = FlipgateConfig::scaffold("Dev");
    let topology = TopologyBuilder::from_config(provisioner(backend, RetryPolicy::default()), &cfg)
        .unwrap()
        .build()
        .await
        .unwrap();

    let table = topology.routes.table(SubnetRole::Container).unwrap();
    assert!(table.default_route().is_none());
    assert!(table.routes.iter().any(|r| matches!(
        &r.target,
        RouteTarget::GatewayEndpoint(name) if name == "Dev-vpce-s3"
    )));
    assert!(topology.routes.table(SubnetRole::Ingress).unwrap().default_route().is_some());
    assert_eq!(topology.interface_endpoints.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn summary_lists_live_listener_targets() {
    let backend = Arc::new(InMemoryBackend::new());
    let cfg = FlipgateConfig::scaffold("Dev");
    let topology = TopologyBuilder::from_config(provisioner(backend, RetryPolicy::default()), &cfg)
        .unwrap()
        .build()
        .await
        .unwrap();

    let summary = topology.summary();
    assert_eq!(summary.subnets.len(), 10);
    assert_eq!(summary.security_edges.len(), 12);
    assert_eq!(summary.route_tables.len(), 5);
    assert_eq!(summary.routers.len(), 2);

    let json = serde_json::to_value(&summary).unwrap();
    let internal = json["routers"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["name"] == "Dev-alb-internal")
        .unwrap();
    assert_eq!(internal["listeners"][0]["target"], "backend-blue");
    assert_eq!(internal["listeners"][1]["target"], "backend-green");
}

#[tokio::test(start_paused = true)]
async fn provisioning_timeout_stops_before_compute() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.fail_creates(ResourceKind::LoadBalancer, 100);
    let policy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        ready_polls: 5,
    };
    let cfg = FlipgateConfig::scaffold("Dev");
    let err = TopologyBuilder::from_config(provisioner(backend.clone(), policy), &cfg)
        .unwrap()
        .build()
        .await
        .err()
        .unwrap();

    assert!(matches!(
        err,
        TopologyError::Router(flipgate_router::RouterError::Provision(
            ProvisionError::Timeout { attempts: 3, .. }
        ))
    ));
    assert_eq!(backend.count(ResourceKind::ComputeService), 0);
    assert_eq!(backend.count(ResourceKind::Subnet), 10);
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let mut cfg = FlipgateConfig::scaffold("Dev");
    cfg.network.as_mut().unwrap().cidr = Some("10.0.0.0/20".to_string());
    let backend = Arc::new(InMemoryBackend::new());
    let builder = TopologyBuilder::from_config(provisioner(backend, RetryPolicy::default()), &cfg);
    // The address space parses; the planner rejects it at build time.
    assert!(builder.is_ok());

    cfg.services.get_mut("backend").unwrap().public = Some(true);
    let backend = Arc::new(InMemoryBackend::new());
    assert!(matches!(
        TopologyBuilder::from_config(provisioner(backend, RetryPolicy::default()), &cfg),
        Err(TopologyError::Config(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn small_address_space_aborts_before_provisioning() {
    let mut cfg = FlipgateConfig::scaffold("Dev");
    cfg.network.as_mut().unwrap().cidr = Some("10.0.0.0/20".to_string());
    let backend = Arc::new(InMemoryBackend::new());
    let err = TopologyBuilder::from_config(provisioner(backend.clone(), RetryPolicy::default()), &cfg)
        .unwrap()
        .build()
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        TopologyError::Network(flipgate_network::NetworkError::AllocationConflict { .. })
    ));
    assert_eq!(backend.count(ResourceKind::VirtualNetwork), 0);
    assert_eq!(backend.count(ResourceKind::InternetGateway), 0);
    assert_eq!(backend.count(ResourceKind::Subnet), 0);
}
