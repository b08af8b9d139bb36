//! Router: one load balancer, its target pools and listeners.
//!
//! Listener targets and pool membership live behind `RwLock`s. A rebind
//! first applies the new forwarding action on the backend, then swaps
//! the target under the write lock, so readers see either the old pool or
//! the new one and never an unbound listener.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use flipgate_core::{
    Color, HealthCheckPolicy, Protocol, Provisionable, ResourceKind, TargetPoolId,
};
use flipgate_provision::{Provisioner, ResourceHandle};

use crate::error::{RouterError, RouterResult};
use crate::listener::{Listener, ListenerHandle, ListenerRole};
use crate::pool::{Replica, TargetPool};

/// The load balancer resource itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancer {
    pub name: String,
    /// Internal routers have no public addresses.
    pub internal: bool,
    pub subnets: Vec<String>,
    pub boundary: String,
}

impl Provisionable for LoadBalancer {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::LoadBalancer
    }

    fn logical_name(&self) -> String {
        self.name.clone()
    }

    fn resource_spec(&self) -> serde_json::Value {
        json!({
            "scheme": if self.internal { "internal" } else { "internet-facing" },
            "subnets": self.subnets,
            "security_groups": [self.boundary],
        })
    }
}

pub struct Router {
    lb: LoadBalancer,
    handle: ResourceHandle,
    provisioner: Provisioner,
    pools: RwLock<HashMap<TargetPoolId, TargetPool>>,
    listeners: RwLock<HashMap<u16, Listener>>,
    /// Serializes rebinds so backend updates and swaps stay in order.
    rebind_lock: Mutex<()>,
}

impl Router {
    /// Provision the load balancer and return an empty router.
    pub async fn create(provisioner: Provisioner, lb: LoadBalancer) -> RouterResult<Self> {
        let handle = provisioner.provision(&lb).await?;
        info!(router = %lb.name, internal = lb.internal, "router created");
        Ok(Self {
            lb,
            handle,
            provisioner,
            pools: RwLock::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            rebind_lock: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.lb.name
    }

    pub fn is_internal(&self) -> bool {
        self.lb.internal
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn load_balancer(&self) -> &LoadBalancer {
        &self.lb
    }

    // ── Target pools ───────────────────────────────────────────────

    /// Create the target pool for `service`/`color`.
    pub async fn create_target_pool(
        &self,
        service: &str,
        color: Color,
        port: u16,
        health: HealthCheckPolicy,
    ) -> RouterResult<TargetPoolId> {
        let id = TargetPoolId::new(service, color);
        if self.pools.read().expect("pools lock").contains_key(&id) {
            return Err(RouterError::DuplicatePool(id.to_string()));
        }

        let mut pool = TargetPool::new(self.provisioner.context(), id.clone(), port, health);
        pool.handle = Some(self.provisioner.provision(&pool).await?);

        let mut pools = self.pools.write().expect("pools lock");
        if pools.contains_key(&id) {
            return Err(RouterError::DuplicatePool(id.to_string()));
        }
        debug!(router = %self.lb.name, pool = %id, "target pool created");
        pools.insert(id.clone(), pool);
        Ok(id)
    }

    /// Snapshot of a pool.
    pub fn pool(&self, id: &TargetPoolId) -> Option<TargetPool> {
        self.pools.read().expect("pools lock").get(id).cloned()
    }

    pub fn pool_revision(&self, id: &TargetPoolId) -> RouterResult<u64> {
        self.pools
            .read()
            .expect("pools lock")
            .get(id)
            .map(|p| p.revision)
            .ok_or_else(|| RouterError::UnknownPool(id.to_string()))
    }

    pub fn endpoints(&self, id: &TargetPoolId) -> RouterResult<Vec<String>> {
        self.pools
            .read()
            .expect("pools lock")
            .get(id)
            .map(TargetPool::endpoints)
            .ok_or_else(|| RouterError::UnknownPool(id.to_string()))
    }

    pub fn pool_ids(&self) -> Vec<TargetPoolId> {
        let mut ids: Vec<_> = self.pools.read().expect("pools lock").keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Apply `change` to a pool's membership if its revision still equals
    /// `expected`. Returns the new revision.
    pub fn update_membership(
        &self,
        id: &TargetPoolId,
        expected: u64,
        change: impl FnOnce(&mut Vec<Replica>),
    ) -> RouterResult<u64> {
        let mut pools = self.pools.write().expect("pools lock");
        let pool = pools
            .get_mut(id)
            .ok_or_else(|| RouterError::UnknownPool(id.to_string()))?;
        if pool.revision != expected {
            return Err(RouterError::RevisionConflict {
                pool: id.to_string(),
                expected,
                actual: pool.revision,
            });
        }
        change(&mut pool.replicas);
        pool.revision += 1;
        debug!(pool = %id, revision = pool.revision, replicas = pool.replicas.len(), "membership updated");
        Ok(pool.revision)
    }

    /// Add replicas, replacing any with the same id.
    pub fn register(&self, id: &TargetPoolId, expected: u64, replicas: Vec<Replica>) -> RouterResult<u64> {
        self.update_membership(id, expected, |members| {
            for replica in replicas {
                members.retain(|r| r.id != replica.id);
                members.push(replica);
            }
        })
    }

    pub fn deregister(&self, id: &TargetPoolId, expected: u64, replica_ids: &[String]) -> RouterResult<u64> {
        self.update_membership(id, expected, |members| {
            members.retain(|r| !replica_ids.contains(&r.id));
        })
    }

    // ── Listeners ──────────────────────────────────────────────────

    /// Provision a listener on `port` forwarding to `forward_to`.
    pub async fn create_listener(
        &self,
        port: u16,
        protocol: Protocol,
        role: ListenerRole,
        forward_to: &TargetPoolId,
    ) -> RouterResult<ListenerHandle> {
        let target_name = self.pool_name(forward_to)?;
        if self.listeners.read().expect("listeners lock").contains_key(&port) {
            return Err(RouterError::PortInUse(port));
        }

        let mut listener = Listener {
            name: format!("{}-listener-{port}", self.lb.name),
            port,
            protocol,
            role,
            target: forward_to.clone(),
            target_name,
            handle: None,
        };
        listener.handle = Some(self.provisioner.provision(&listener).await?);

        let mut listeners = self.listeners.write().expect("listeners lock");
        if listeners.contains_key(&port) {
            return Err(RouterError::PortInUse(port));
        }
        listeners.insert(port, listener);
        info!(router = %self.lb.name, port, %role, target = %forward_to, "listener created");
        Ok(ListenerHandle {
            router: self.lb.name.clone(),
            port,
            role,
        })
    }

    /// Point `listener` at `new_target`. Returns the previous target.
    ///
    /// The backend update happens first; if it fails the listener keeps
    /// its current target. Only pools of the same service are accepted.
    pub async fn rebind(
        &self,
        listener: &ListenerHandle,
        new_target: &TargetPoolId,
    ) -> RouterResult<TargetPoolId> {
        let _guard = self.rebind_lock.lock().await;

        let target_name = self.pool_name(new_target)?;
        let current = self.listener(listener.port)?;
        if current.target.service != new_target.service {
            return Err(RouterError::InvalidTarget {
                port: listener.port,
                pool: new_target.to_string(),
                reason: format!("listener serves {}", current.target.service),
            });
        }
        if current.target == *new_target {
            return Ok(current.target);
        }

        let handle = current
            .handle
            .clone()
            .ok_or(RouterError::UnknownListener(listener.port))?;
        if let Err(e) = self
            .provisioner
            .update(&handle, &current.name, &current.spec_for(&target_name))
            .await
        {
            warn!(listener = %listener, target = %new_target, error = %e, "rebind rejected by backend");
            return Err(e.into());
        }

        let previous = {
            let mut listeners = self.listeners.write().expect("listeners lock");
            let entry = listeners
                .get_mut(&listener.port)
                .ok_or(RouterError::UnknownListener(listener.port))?;
            entry.target_name = target_name;
            std::mem::replace(&mut entry.target, new_target.clone())
        };
        info!(listener = %listener, from = %previous, to = %new_target, "listener rebound");
        Ok(previous)
    }

    /// Push the listener's current target to the backend again.
    ///
    /// Restores a listener whose last update may have reached the backend
    /// without being confirmed.
    pub async fn resync(&self, listener: &ListenerHandle) -> RouterResult<()> {
        let _guard = self.rebind_lock.lock().await;

        let current = self.listener(listener.port)?;
        let handle = current
            .handle
            .clone()
            .ok_or(RouterError::UnknownListener(listener.port))?;
        self.provisioner
            .update(&handle, &current.name, &current.spec_for(&current.target_name))
            .await?;
        info!(listener = %listener, target = %current.target, "listener resynced");
        Ok(())
    }

    /// The pool a listener currently forwards to.
    pub fn forwarding_target(&self, listener: &ListenerHandle) -> RouterResult<TargetPoolId> {
        self.listeners
            .read()
            .expect("listeners lock")
            .get(&listener.port)
            .map(|l| l.target.clone())
            .ok_or(RouterError::UnknownListener(listener.port))
    }

    /// Snapshot of the listener on `port`.
    pub fn listener(&self, port: u16) -> RouterResult<Listener> {
        self.listeners
            .read()
            .expect("listeners lock")
            .get(&port)
            .cloned()
            .ok_or(RouterError::UnknownListener(port))
    }

    pub fn listeners(&self) -> Vec<Listener> {
        let mut all: Vec<_> = self
            .listeners
            .read()
            .expect("listeners lock")
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|l| l.port);
        all
    }

    fn pool_name(&self, id: &TargetPoolId) -> RouterResult<String> {
        self.pools
            .read()
            .expect("pools lock")
            .get(id)
            .map(|p| p.name.clone())
            .ok_or_else(|| RouterError::UnknownPool(id.to_string()))
    }
}
