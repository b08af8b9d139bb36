//! TopologyBuilder: walks the stage graph and provisions each stage.

use std::collections::BTreeMap;
use std::sync::Arc;

use ipnet::Ipv4Net;
use tracing::{debug, info};

use flipgate_compute::{ComputeManager, ComputePoolHandle, ScalingPolicy, TaskDefinition};
use flipgate_core::config::ServiceConfig;
use flipgate_core::{
    Color, DeploymentContext, FlipgateConfig, HealthCheckPolicy, Protocol, Provisionable,
    TargetPoolId,
};
use flipgate_network::{
    BoundaryRole, GatewayEndpoint, InterfaceEndpoint, InternetGateway, NetworkError, Peer,
    RouteTopology, SecurityBoundary, SecurityPolicyGraph, SubnetGroup, SubnetPlan, SubnetPlanner,
    SubnetRole, VirtualNetwork,
};
use flipgate_network::subnet::ZONE_COUNT;
use flipgate_provision::{Provisioner, ResourceHandle};
use flipgate_router::{ListenerHandle, ListenerRole, LoadBalancer, Router};

use crate::error::{TopologyError, TopologyResult};
use crate::stage::BuildStage;

/// Port of every production listener.
pub const PRODUCTION_PORT: u16 = 80;
/// Port of the internal router's test listener.
pub const TEST_PORT: u16 = 10080;

/// Paths the routers, endpoints and replicas need open.
const REQUIRED_PATHS: [(BoundaryRole, BoundaryRole, u16); 8] = [
    (BoundaryRole::Ingress, BoundaryRole::FrontContainer, PRODUCTION_PORT),
    (BoundaryRole::FrontContainer, BoundaryRole::InternalRouter, PRODUCTION_PORT),
    (BoundaryRole::Management, BoundaryRole::InternalRouter, PRODUCTION_PORT),
    (BoundaryRole::Management, BoundaryRole::InternalRouter, TEST_PORT),
    (BoundaryRole::InternalRouter, BoundaryRole::Container, PRODUCTION_PORT),
    (BoundaryRole::Container, BoundaryRole::EgressEndpoint, 443),
    (BoundaryRole::FrontContainer, BoundaryRole::EgressEndpoint, 443),
    (BoundaryRole::Management, BoundaryRole::EgressEndpoint, 443),
];

/// Everything needed to stand up one service.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub name: String,
    /// Fronted by the internet-facing router.
    pub public: bool,
    pub task: TaskDefinition,
    pub desired: u32,
    pub scaling: Option<ScalingPolicy>,
    pub health: HealthCheckPolicy,
}

impl ServiceSpec {
    pub fn new(name: &str, public: bool, task: TaskDefinition, desired: u32) -> Self {
        Self {
            name: name.to_string(),
            public,
            task,
            desired,
            scaling: None,
            health: HealthCheckPolicy::default(),
        }
    }

    pub fn with_scaling(mut self, min: u32, max: u32, target_cpu_percent: f64) -> Self {
        self.scaling = Some(ScalingPolicy {
            min,
            max,
            target_cpu_percent,
        });
        self
    }

    pub fn from_config(
        ctx: &DeploymentContext,
        name: &str,
        cfg: &ServiceConfig,
    ) -> TopologyResult<Self> {
        let task = TaskDefinition::from_config(ctx, name, cfg)?;
        let desired = cfg.desired_count.unwrap_or(1);
        let mut spec = Self::new(name, cfg.is_public(), task, desired);
        if cfg.min_count.is_some() || cfg.max_count.is_some() || cfg.target_cpu_percent.is_some() {
            let min = cfg.min_count.unwrap_or(1);
            let max = cfg.max_count.unwrap_or(min.max(desired));
            spec = spec.with_scaling(min, max, cfg.target_cpu_percent.unwrap_or(60.0));
        }
        Ok(spec)
    }

    /// Boundary the service's replicas run behind.
    pub fn boundary_role(&self) -> BoundaryRole {
        if self.public {
            BoundaryRole::FrontContainer
        } else {
            BoundaryRole::Container
        }
    }
}

/// The routing and compute wiring of one blue/green service.
#[derive(Clone)]
pub struct ServiceTopology {
    pub name: String,
    pub public: bool,
    pub router: Arc<Router>,
    pub production: ListenerHandle,
    /// Only the internal router carries a test listener.
    pub test: Option<ListenerHandle>,
    pub health: HealthCheckPolicy,
    pub task: TaskDefinition,
    pub desired: u32,
    pub scaling: Option<ScalingPolicy>,
    pub subnets: SubnetGroup,
    pub boundary: SecurityBoundary,
    /// The pool registered into blue at build time.
    pub initial_pool: ComputePoolHandle,
}

impl ServiceTopology {
    pub fn pool_id(&self, color: Color) -> TargetPoolId {
        TargetPoolId::new(&self.name, color)
    }
}

/// A fully built topology.
pub struct Topology {
    pub ctx: DeploymentContext,
    pub network: VirtualNetwork,
    pub gateway: InternetGateway,
    pub plan: SubnetPlan,
    pub security: SecurityPolicyGraph,
    pub routes: RouteTopology,
    pub interface_endpoints: Vec<InterfaceEndpoint>,
    pub gateway_endpoint: GatewayEndpoint,
    pub services: BTreeMap<String, ServiceTopology>,
    pub compute: Arc<ComputeManager>,
    /// Stages in the order they ran.
    pub stages: Vec<BuildStage>,
}

impl Topology {
    pub fn service(&self, name: &str) -> Option<&ServiceTopology> {
        self.services.get(name)
    }
}

/// Per-service routing produced by the routers stage.
struct Routing {
    router: Arc<Router>,
    production: ListenerHandle,
    test: Option<ListenerHandle>,
}

/// Everything derivable from configuration alone, computed and checked
/// before the first resource is provisioned.
struct Planned {
    network: VirtualNetwork,
    gateway: InternetGateway,
    plan: SubnetPlan,
    security: SecurityPolicyGraph,
    routes: RouteTopology,
}

/// Stage outputs collected while the build walks the graph.
#[derive(Default)]
struct Outputs {
    network: Option<(VirtualNetwork, InternetGateway)>,
    plan: Option<SubnetPlan>,
    security: Option<SecurityPolicyGraph>,
    routes: Option<(RouteTopology, BTreeMap<SubnetRole, ResourceHandle>)>,
    endpoints: Option<(Vec<InterfaceEndpoint>, GatewayEndpoint)>,
    routing: Option<BTreeMap<String, Routing>>,
    pools: Option<BTreeMap<String, ComputePoolHandle>>,
}

fn input<T>(slot: &Option<T>, stage: BuildStage) -> TopologyResult<&T> {
    slot.as_ref().ok_or(TopologyError::MissingInput(stage))
}

pub struct TopologyBuilder {
    provisioner: Provisioner,
    address_space: Ipv4Net,
    public: ServiceSpec,
    internal: ServiceSpec,
    compute: Arc<ComputeManager>,
}

impl TopologyBuilder {
    pub fn new(
        provisioner: Provisioner,
        address_space: Ipv4Net,
        public: ServiceSpec,
        internal: ServiceSpec,
    ) -> TopologyResult<Self> {
        if !public.public || internal.public {
            return Err(TopologyError::Config(
                "need one public and one internal service".to_string(),
            ));
        }
        if public.name == internal.name {
            return Err(TopologyError::Config(format!(
                "services must have distinct names, both are {}",
                public.name
            )));
        }
        let compute = Arc::new(ComputeManager::new(provisioner.clone()));
        Ok(Self {
            provisioner,
            address_space,
            public,
            internal,
            compute,
        })
    }

    /// Builder for the two services declared in `cfg`.
    pub fn from_config(provisioner: Provisioner, cfg: &FlipgateConfig) -> TopologyResult<Self> {
        cfg.validate()
            .map_err(|e| TopologyError::Config(e.to_string()))?;
        let address_space: Ipv4Net = cfg
            .cidr()
            .parse()
            .map_err(|e| TopologyError::Config(format!("network.cidr {}: {e}", cfg.cidr())))?;

        let ctx = provisioner.context().clone();
        let (public_name, public_cfg) = cfg
            .public_service()
            .ok_or_else(|| TopologyError::Config("no public service".to_string()))?;
        let (internal_name, internal_cfg) = cfg
            .internal_service()
            .ok_or_else(|| TopologyError::Config("no internal service".to_string()))?;
        let public = ServiceSpec::from_config(&ctx, public_name, public_cfg)?;
        let internal = ServiceSpec::from_config(&ctx, internal_name, internal_cfg)?;
        Self::new(provisioner, address_space, public, internal)
    }

    /// Run every stage in dependency order.
    pub async fn build(self) -> TopologyResult<Topology> {
        let mut graph = BuildStage::graph()?;
        let order = graph.topological_order()?;
        info!(stage = %self.ctx().stage, stages = ?order, "building topology");

        let mut planned = Some(self.preflight()?);
        let mut out = Outputs::default();
        for stage in &order {
            graph.ensure_dependencies_ready(stage)?;
            debug!(%stage, "stage started");
            self.run_stage(*stage, &mut planned, &mut out).await?;
            graph.mark_ready(stage)?;
            info!(%stage, "stage ready");
        }

        let (network, gateway) = out.network.ok_or(TopologyError::MissingInput(BuildStage::Network))?;
        let plan = out.plan.ok_or(TopologyError::MissingInput(BuildStage::Subnets))?;
        let security = out
            .security
            .ok_or(TopologyError::MissingInput(BuildStage::SecurityPolicy))?;
        let (routes, _) = out.routes.ok_or(TopologyError::MissingInput(BuildStage::Routes))?;
        let (interface_endpoints, gateway_endpoint) = out
            .endpoints
            .ok_or(TopologyError::MissingInput(BuildStage::Endpoints))?;
        let mut routing = out.routing.ok_or(TopologyError::MissingInput(BuildStage::Routers))?;
        let pools = out.pools.ok_or(TopologyError::MissingInput(BuildStage::Compute))?;

        let subnets = plan.group(SubnetRole::Container).clone();
        let mut services = BTreeMap::new();
        for spec in [self.public, self.internal] {
            let wiring = routing
                .remove(&spec.name)
                .ok_or(TopologyError::MissingInput(BuildStage::Routers))?;
            let initial_pool = pools
                .get(&spec.name)
                .cloned()
                .ok_or(TopologyError::MissingInput(BuildStage::Compute))?;
            let boundary = security
                .boundary(spec.boundary_role())
                .cloned()
                .ok_or_else(|| NetworkError::UnknownBoundary(spec.boundary_role().to_string()))?;
            services.insert(
                spec.name.clone(),
                ServiceTopology {
                    name: spec.name,
                    public: spec.public,
                    router: wiring.router,
                    production: wiring.production,
                    test: wiring.test,
                    health: spec.health,
                    task: spec.task,
                    desired: spec.desired,
                    scaling: spec.scaling,
                    subnets: subnets.clone(),
                    boundary,
                    initial_pool,
                },
            );
        }

        let ctx = self.provisioner.context().clone();
        info!(stage = %ctx.stage, services = services.len(), "topology built");
        Ok(Topology {
            ctx,
            network,
            gateway,
            plan,
            security,
            routes,
            interface_endpoints,
            gateway_endpoint,
            services,
            compute: self.compute,
            stages: order,
        })
    }

    fn ctx(&self) -> &DeploymentContext {
        self.provisioner.context()
    }

    /// Plan the address space, the security graph and the route tables,
    /// and check every reachability requirement the later stages rely on.
    fn preflight(&self) -> TopologyResult<Planned> {
        let ctx = self.ctx();
        let network = VirtualNetwork::new(ctx, self.address_space);
        let gateway = InternetGateway::new(ctx, &network);
        let plan = SubnetPlanner::plan(self.address_space, ZONE_COUNT, ctx)?;
        let security = SecurityPolicyGraph::standard(ctx)?;
        let routes = RouteTopology::standard(ctx, &plan, &gateway)?;

        if !security.permits(Peer::AnyIpv4, BoundaryRole::Ingress, PRODUCTION_PORT) {
            return Err(NetworkError::UnreachableTarget {
                from: Peer::AnyIpv4.to_string(),
                to: BoundaryRole::Ingress.to_string(),
                port: PRODUCTION_PORT,
            }
            .into());
        }
        for (from, to, port) in REQUIRED_PATHS {
            security.require(from, to, port)?;
        }
        debug!(address_space = %self.address_space, subnets = plan.subnets().count(), "preflight passed");

        Ok(Planned {
            network,
            gateway,
            plan,
            security,
            routes,
        })
    }

    async fn run_stage(
        &self,
        stage: BuildStage,
        planned: &mut Option<Planned>,
        out: &mut Outputs,
    ) -> TopologyResult<()> {
        match stage {
            BuildStage::Network => {
                let p = planned.as_ref().ok_or(TopologyError::MissingInput(stage))?;
                self.provisioner.provision(&p.network).await?;
                self.provisioner.provision(&p.gateway).await?;
            }
            BuildStage::Subnets => {
                let p = planned.as_ref().ok_or(TopologyError::MissingInput(stage))?;
                for subnet in p.plan.subnets() {
                    self.provisioner.provision(subnet).await?;
                }
            }
            BuildStage::SecurityPolicy => {
                let p = planned.as_ref().ok_or(TopologyError::MissingInput(stage))?;
                for boundary in p.security.boundaries() {
                    self.provisioner.provision(boundary).await?;
                }
            }
            BuildStage::Routes => {
                let p = planned.take().ok_or(TopologyError::MissingInput(stage))?;
                let routes = p.routes;
                let mut handles = BTreeMap::new();
                for table in routes.tables() {
                    handles.insert(table.role, self.provisioner.provision(table).await?);
                }
                out.routes = Some((routes, handles));
                out.network = Some((p.network, p.gateway));
                out.plan = Some(p.plan);
                out.security = Some(p.security);
            }
            BuildStage::Endpoints => self.build_endpoints(out).await?,
            BuildStage::Routers => self.build_routers(out).await?,
            BuildStage::Compute => self.build_compute(out).await?,
        }
        Ok(())
    }

    async fn build_endpoints(&self, out: &mut Outputs) -> TopologyResult<()> {
        let stage = BuildStage::Endpoints;
        let plan = input(&out.plan, stage)?;
        let security = input(&out.security, stage)?;
        let boundary = security
            .boundary(BoundaryRole::EgressEndpoint)
            .ok_or_else(|| NetworkError::UnknownBoundary(BoundaryRole::EgressEndpoint.to_string()))?;
        let interface = InterfaceEndpoint::standard(
            self.ctx(),
            plan.group(SubnetRole::Egress),
            &boundary.name,
        );
        for endpoint in &interface {
            self.provisioner.provision(endpoint).await?;
        }

        let (routes, handles) = out
            .routes
            .as_mut()
            .ok_or(TopologyError::MissingInput(stage))?;
        let container_table = routes
            .table(SubnetRole::Container)
            .map(|t| t.name.clone())
            .ok_or(TopologyError::MissingInput(stage))?;
        let gateway = GatewayEndpoint::object_storage(self.ctx(), vec![container_table]);
        self.provisioner.provision(&gateway).await?;

        routes.add_endpoint_route(SubnetRole::Container, &gateway)?;
        if let (Some(table), Some(handle)) = (
            routes.table(SubnetRole::Container),
            handles.get(&SubnetRole::Container),
        ) {
            self.provisioner
                .update(handle, &table.logical_name(), &table.resource_spec())
                .await?;
        }

        out.endpoints = Some((interface, gateway));
        Ok(())
    }

    async fn build_routers(&self, out: &mut Outputs) -> TopologyResult<()> {
        let stage = BuildStage::Routers;
        let plan = input(&out.plan, stage)?;
        let ctx = self.ctx();
        let mut routing = BTreeMap::new();

        // Internet-facing router in front of the public service.
        let public = Router::create(
            self.provisioner.clone(),
            LoadBalancer {
                name: ctx.name(&format!("alb-ingress-{}", self.public.name)),
                internal: false,
                subnets: plan.group(SubnetRole::Ingress).names(),
                boundary: ctx.name("sg-ingress"),
            },
        )
        .await?;
        let blue = self.create_pools(&public, &self.public).await?;
        let production = public
            .create_listener(PRODUCTION_PORT, Protocol::Http, ListenerRole::Production, &blue)
            .await?;
        routing.insert(
            self.public.name.clone(),
            Routing {
                router: Arc::new(public),
                production,
                test: None,
            },
        );

        // Internal router between the tiers, with the test listener.
        let internal = Router::create(
            self.provisioner.clone(),
            LoadBalancer {
                name: ctx.name("alb-internal"),
                internal: true,
                subnets: plan.group(SubnetRole::Container).names(),
                boundary: ctx.name("sg-internal"),
            },
        )
        .await?;
        let blue = self.create_pools(&internal, &self.internal).await?;
        let production = internal
            .create_listener(PRODUCTION_PORT, Protocol::Http, ListenerRole::Production, &blue)
            .await?;
        let test = internal
            .create_listener(TEST_PORT, Protocol::Http, ListenerRole::Test, &blue.sibling())
            .await?;
        routing.insert(
            self.internal.name.clone(),
            Routing {
                router: Arc::new(internal),
                production,
                test: Some(test),
            },
        );

        out.routing = Some(routing);
        Ok(())
    }

    /// Blue and green pools sharing one health policy. Returns blue.
    async fn create_pools(&self, router: &Router, spec: &ServiceSpec) -> TopologyResult<TargetPoolId> {
        let port = spec.task.container_port;
        let blue = router
            .create_target_pool(&spec.name, Color::Blue, port, spec.health.clone())
            .await?;
        router
            .create_target_pool(&spec.name, Color::Green, port, spec.health.clone())
            .await?;
        Ok(blue)
    }

    async fn build_compute(&self, out: &mut Outputs) -> TopologyResult<()> {
        let stage = BuildStage::Compute;
        let plan = input(&out.plan, stage)?;
        let security = input(&out.security, stage)?;
        let routing = input(&out.routing, stage)?;

        let mut pools = BTreeMap::new();
        for spec in [&self.public, &self.internal] {
            let wiring = routing
                .get(&spec.name)
                .ok_or(TopologyError::MissingInput(stage))?;
            let boundary = security
                .boundary(spec.boundary_role())
                .ok_or_else(|| NetworkError::UnknownBoundary(spec.boundary_role().to_string()))?;
            let live = wiring.router.forwarding_target(&wiring.production)?;
            let handle = self
                .compute
                .register(
                    spec.task.clone(),
                    spec.desired,
                    plan.group(SubnetRole::Container),
                    boundary,
                    &wiring.router,
                    &live,
                )
                .await?;
            if let Some(scaling) = spec.scaling {
                self.compute
                    .scale(&handle, scaling.min, scaling.max, scaling.target_cpu_percent)
                    .await?;
            }
            pools.insert(spec.name.clone(), handle);
        }
        out.pools = Some(pools);
        Ok(())
    }
}
