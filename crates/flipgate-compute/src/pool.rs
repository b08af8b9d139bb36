//! Compute pools: placement, registration and scaling of replicas.
//!
//! Every pool registers into exactly one target pool. Membership changes
//! go through the router's compare-and-swap on the pool revision and are
//! retried a bounded number of times when another writer got there first.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use flipgate_core::{Provisionable, ResourceKind, TargetPoolId};
use flipgate_network::{BoundaryRole, SecurityBoundary, SubnetGroup, SubnetRole};
use flipgate_provision::{Provisioner, ResourceHandle};
use flipgate_router::{Replica, Router, RouterError, RouterResult};

use crate::error::{ComputeError, ComputeResult};
use crate::task::TaskDefinition;

/// Attempts at a conditional membership update before giving up.
const CAS_ATTEMPTS: u32 = 5;

/// Host offset of the first replica address in a subnet (`.10`).
const FIRST_HOST: usize = 9;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComputePoolHandle {
    pub service: String,
    /// `{service}-{color}-{seq}`, unique per manager.
    pub revision: String,
}

impl fmt::Display for ComputePoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.revision)
    }
}

/// Target-tracking bounds for a pool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub min: u32,
    pub max: u32,
    pub target_cpu_percent: f64,
}

impl ScalingPolicy {
    pub fn clamp(&self, count: u32) -> u32 {
        count.clamp(self.min, self.max)
    }
}

/// One revision of a service's replicas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputePool {
    pub handle: ComputePoolHandle,
    pub name: String,
    pub task: TaskDefinition,
    pub target: TargetPoolId,
    pub zones: [String; 2],
    pub cidrs: [Ipv4Net; 2],
    pub subnets: Vec<String>,
    pub boundary: String,
    /// Private DNS name, internal services only.
    pub discovery_name: Option<String>,
    pub desired: u32,
    pub scaling: Option<ScalingPolicy>,
    pub replicas: Vec<Replica>,
    pub task_handle: Option<ResourceHandle>,
    pub service_handle: Option<ResourceHandle>,
    next_replica: u32,
}

impl ComputePool {
    pub fn replica_count(&self) -> u32 {
        self.replicas.len() as u32
    }
}

impl Provisionable for ComputePool {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::ComputeService
    }

    fn logical_name(&self) -> String {
        self.name.clone()
    }

    fn resource_spec(&self) -> serde_json::Value {
        json!({
            "task_definition": self.task.logical_name(),
            "desired_count": self.desired,
            "launch_type": "fargate",
            "subnets": self.subnets,
            "security_groups": [self.boundary],
            "assign_public_ip": false,
            "load_balancer": {
                "target_pool": self.target.to_string(),
                "container_name": self.task.service,
                "container_port": self.task.container_port,
            },
            "service_discovery": self.discovery_name,
        })
    }
}

struct PoolEntry {
    pool: ComputePool,
    router: Arc<Router>,
}

/// Registry of live compute pools.
pub struct ComputeManager {
    provisioner: Provisioner,
    pools: RwLock<HashMap<ComputePoolHandle, PoolEntry>>,
    /// Replica addresses in use per subnet.
    hosts: std::sync::Mutex<HashMap<Ipv4Net, BTreeSet<Ipv4Addr>>>,
    seq: AtomicU64,
    /// Serializes replica count changes.
    scale_lock: Mutex<()>,
}

impl ComputeManager {
    pub fn new(provisioner: Provisioner) -> Self {
        Self {
            provisioner,
            pools: RwLock::new(HashMap::new()),
            hosts: std::sync::Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
            scale_lock: Mutex::new(()),
        }
    }

    /// Launch `desired` replicas of `task` and register them into `target`.
    ///
    /// Replicas go only into container subnets, alternating zones.
    pub async fn register(
        &self,
        task: TaskDefinition,
        desired: u32,
        subnets: &SubnetGroup,
        boundary: &SecurityBoundary,
        router: &Arc<Router>,
        target: &TargetPoolId,
    ) -> ComputeResult<ComputePoolHandle> {
        if subnets.role != SubnetRole::Container {
            return Err(ComputeError::InvalidPlacement(format!(
                "replicas cannot run in {} subnets",
                subnets.role
            )));
        }
        if !matches!(boundary.role, BoundaryRole::Container | BoundaryRole::FrontContainer) {
            return Err(ComputeError::InvalidPlacement(format!(
                "replicas cannot run behind the {} boundary",
                boundary.role
            )));
        }
        if task.service != target.service {
            return Err(ComputeError::InvalidPlacement(format!(
                "{} replicas cannot report to {target}",
                task.service
            )));
        }
        router.pool_revision(target)?;

        let ctx = self.provisioner.context();
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = ComputePoolHandle {
            service: task.service.clone(),
            revision: format!("{}-{}-{seq}", task.service, target.color),
        };
        let discovery_name = (boundary.role == BoundaryRole::Container)
            .then(|| ctx.name(&format!("ecs-{}-service.local", task.service)));

        let mut pool = ComputePool {
            name: ctx.name(&format!("ecs-{}", handle.revision)),
            handle: handle.clone(),
            task,
            target: target.clone(),
            zones: [subnets.subnets[0].zone.clone(), subnets.subnets[1].zone.clone()],
            cidrs: subnets.cidrs(),
            subnets: subnets.names(),
            boundary: boundary.name.clone(),
            discovery_name,
            desired,
            scaling: None,
            replicas: Vec::new(),
            task_handle: None,
            service_handle: None,
            next_replica: 0,
        };

        pool.task_handle = Some(self.provisioner.provision(&pool.task).await?);
        pool.service_handle = Some(self.provisioner.provision(&pool).await?);

        let replicas = self.place(&mut pool, desired)?;
        let ids: Vec<String> = replicas.iter().map(|r| r.id.clone()).collect();
        if let Err(e) = register_with_retry(router, target, |expected| {
            router.register(target, expected, replicas.clone())
        }) {
            self.release(&pool, &replicas);
            return Err(e);
        }
        pool.replicas = replicas;

        info!(
            pool = %handle,
            target = %target,
            image = %pool.task.image,
            replicas = ?ids,
            "compute pool registered"
        );
        self.pools.write().expect("compute pools lock").insert(
            handle.clone(),
            PoolEntry {
                pool,
                router: Arc::clone(router),
            },
        );
        Ok(handle)
    }

    /// Attach target-tracking bounds and bring the replica count inside them.
    pub async fn scale(
        &self,
        handle: &ComputePoolHandle,
        min: u32,
        max: u32,
        target_cpu_percent: f64,
    ) -> ComputeResult<u32> {
        if min > max {
            return Err(ComputeError::InvalidScaling { min, max });
        }
        let desired = {
            let mut pools = self.pools.write().expect("compute pools lock");
            let entry = pools
                .get_mut(handle)
                .ok_or_else(|| ComputeError::UnknownPool(handle.to_string()))?;
            let policy = ScalingPolicy {
                min,
                max,
                target_cpu_percent,
            };
            entry.pool.scaling = Some(policy);
            policy.clamp(entry.pool.desired)
        };
        debug!(pool = %handle, min, max, target_cpu_percent, "scaling policy set");
        self.set_desired(handle, desired).await
    }

    /// Change the replica count, clamped to the pool's scaling bounds.
    /// Returns the count actually applied.
    pub async fn set_desired(&self, handle: &ComputePoolHandle, requested: u32) -> ComputeResult<u32> {
        let _guard = self.scale_lock.lock().await;

        let (mut pool, router) = self.entry(handle)?;
        let desired = pool.scaling.map_or(requested, |s| s.clamp(requested));
        let current = pool.replica_count();
        if desired == current && desired == pool.desired {
            return Ok(desired);
        }

        pool.desired = desired;
        if let Some(service) = &pool.service_handle {
            self.provisioner
                .update(service, &pool.name, &pool.resource_spec())
                .await?;
        }

        if desired > current {
            let added = self.place(&mut pool, desired - current)?;
            if let Err(e) = register_with_retry(&router, &pool.target, |expected| {
                router.register(&pool.target, expected, added.clone())
            }) {
                self.release(&pool, &added);
                return Err(e);
            }
            pool.replicas.extend(added);
        } else if desired < current {
            let removed = pool.replicas.split_off(desired as usize);
            let ids: Vec<String> = removed.iter().map(|r| r.id.clone()).collect();
            register_with_retry(&router, &pool.target, |expected| {
                router.deregister(&pool.target, expected, &ids)
            })?;
            self.release(&pool, &removed);
        }

        info!(pool = %handle, from = current, to = desired, "replica count changed");
        if let Some(entry) = self.pools.write().expect("compute pools lock").get_mut(handle) {
            entry.pool = pool;
        }
        Ok(desired)
    }

    /// Deregister every replica and delete the pool's service.
    pub async fn teardown(&self, handle: &ComputePoolHandle) -> ComputeResult<()> {
        let _guard = self.scale_lock.lock().await;

        let (pool, router) = self.entry(handle)?;
        let ids: Vec<String> = pool.replicas.iter().map(|r| r.id.clone()).collect();
        match register_with_retry(&router, &pool.target, |expected| {
            router.deregister(&pool.target, expected, &ids)
        }) {
            Ok(_) | Err(ComputeError::Router(RouterError::UnknownPool(_))) => {}
            Err(e) => return Err(e),
        }
        if let Some(service) = &pool.service_handle {
            self.provisioner.destroy(service, &pool.name).await?;
        }

        self.release(&pool, &pool.replicas);
        self.pools.write().expect("compute pools lock").remove(handle);
        info!(pool = %handle, target = %pool.target, replicas = ids.len(), "compute pool torn down");
        Ok(())
    }

    /// Snapshot of a pool.
    pub fn get(&self, handle: &ComputePoolHandle) -> Option<ComputePool> {
        self.pools
            .read()
            .expect("compute pools lock")
            .get(handle)
            .map(|e| e.pool.clone())
    }

    pub fn handles(&self) -> Vec<ComputePoolHandle> {
        let mut handles: Vec<_> = self
            .pools
            .read()
            .expect("compute pools lock")
            .keys()
            .cloned()
            .collect();
        handles.sort();
        handles
    }

    /// Pools currently registered into `target`.
    pub fn pools_in(&self, target: &TargetPoolId) -> Vec<ComputePoolHandle> {
        let mut handles: Vec<_> = self
            .pools
            .read()
            .expect("compute pools lock")
            .values()
            .filter(|e| &e.pool.target == target)
            .map(|e| e.pool.handle.clone())
            .collect();
        handles.sort();
        handles
    }

    fn entry(&self, handle: &ComputePoolHandle) -> ComputeResult<(ComputePool, Arc<Router>)> {
        self.pools
            .read()
            .expect("compute pools lock")
            .get(handle)
            .map(|e| (e.pool.clone(), Arc::clone(&e.router)))
            .ok_or_else(|| ComputeError::UnknownPool(handle.to_string()))
    }

    /// Allocate `count` new replicas, alternating zones, each on the
    /// lowest free address of its subnet. All or nothing.
    fn place(&self, pool: &mut ComputePool, count: u32) -> ComputeResult<Vec<Replica>> {
        let mut hosts = self.hosts.lock().expect("hosts lock");
        let mut placed: Vec<Replica> = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let zone = (pool.replicas.len() + placed.len()) % 2;
            let cidr = pool.cidrs[zone];
            let used = hosts.entry(cidr).or_default();
            let Some(address) = cidr.hosts().skip(FIRST_HOST).find(|a| !used.contains(a)) else {
                drop(hosts);
                self.release(pool, &placed);
                pool.next_replica -= placed.len() as u32;
                return Err(ComputeError::InvalidPlacement(format!(
                    "subnet {cidr} has no free addresses"
                )));
            };
            used.insert(address);

            pool.next_replica += 1;
            placed.push(Replica {
                id: format!("{}-{}", pool.handle.revision, pool.next_replica),
                address: address.to_string(),
                port: pool.task.container_port,
                zone: pool.zones[zone].clone(),
                revision: pool.handle.revision.clone(),
            });
        }
        Ok(placed)
    }

    /// Return replica addresses to their subnets.
    fn release(&self, pool: &ComputePool, replicas: &[Replica]) {
        let mut hosts = self.hosts.lock().expect("hosts lock");
        for replica in replicas {
            let Ok(address) = replica.address.parse::<Ipv4Addr>() else {
                continue;
            };
            if let Some(cidr) = pool.cidrs.iter().find(|c| c.contains(&address))
                && let Some(used) = hosts.get_mut(cidr)
            {
                used.remove(&address);
            }
        }
    }
}

/// Run a conditional membership update, re-reading the revision on conflict.
fn register_with_retry(
    router: &Router,
    target: &TargetPoolId,
    mut change: impl FnMut(u64) -> RouterResult<u64>,
) -> ComputeResult<u64> {
    for attempt in 1..=CAS_ATTEMPTS {
        let expected = router.pool_revision(target)?;
        match change(expected) {
            Ok(revision) => return Ok(revision),
            Err(RouterError::RevisionConflict { actual, .. }) => {
                warn!(pool = %target, attempt, expected, actual, "membership conflict, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(ComputeError::RegistrationConflict {
        pool: target.to_string(),
        attempts: CAS_ATTEMPTS,
    })
}
