//! Provisioner: idempotent create/update/destroy against the backend.
//!
//! Every call carries a request token derived from the deployment context
//! and the resource's logical name, so a retried call never duplicates a
//! resource. Creation and updates wait for the backend to report `Ready`
//! before returning.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use flipgate_core::{DeploymentContext, Provisionable};
use flipgate_state::{ResourceRecord, ResourceStatus, StateStore};

use crate::backend::{ProvisioningBackend, RequestToken, ResourceHandle};
use crate::error::{ProvisionError, ProvisionResult};
use crate::retry::RetryPolicy;

/// Shared handle to the provisioning backend.
#[derive(Clone)]
pub struct Provisioner {
    ctx: Arc<DeploymentContext>,
    backend: Arc<dyn ProvisioningBackend>,
    policy: RetryPolicy,
    state: Option<StateStore>,
    update_seq: Arc<AtomicU64>,
}

impl Provisioner {
    pub fn new(
        ctx: DeploymentContext,
        backend: Arc<dyn ProvisioningBackend>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            ctx: Arc::new(ctx),
            backend,
            policy,
            state: None,
            update_seq: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Record every provisioned resource in `store`.
    pub fn with_state(mut self, store: StateStore) -> Self {
        self.state = Some(store);
        self
    }

    pub fn context(&self) -> &DeploymentContext {
        &self.ctx
    }

    pub fn backend(&self) -> &Arc<dyn ProvisioningBackend> {
        &self.backend
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn token_for(&self, logical_name: &str) -> RequestToken {
        RequestToken::new(format!("{}/{}", self.ctx.token_scope(), logical_name))
    }

    /// Create a resource and wait until the backend reports it ready.
    pub async fn provision(&self, resource: &dyn Provisionable) -> ProvisionResult<ResourceHandle> {
        let name = resource.logical_name();
        let kind = resource.resource_kind();
        let spec = resource.resource_spec();
        let token = self.token_for(&name);

        let handle = self
            .policy
            .run(&name, || self.backend.create_resource(kind, &spec, &token))
            .await?;
        debug!(%name, %handle, "create accepted");

        self.await_ready(&handle, &name).await?;
        self.record(&name, &handle, ResourceStatus::Ready)?;
        info!(%name, %handle, "resource ready");
        Ok(handle)
    }

    /// Apply a new spec to an existing resource and wait for it to settle.
    ///
    /// One token is minted per logical update and reused across retries.
    pub async fn update(
        &self,
        handle: &ResourceHandle,
        logical_name: &str,
        spec: &serde_json::Value,
    ) -> ProvisionResult<()> {
        let seq = self.update_seq.fetch_add(1, Ordering::SeqCst);
        let token = self.token_for(&format!("{logical_name}/update/{seq}"));

        self.policy
            .run(logical_name, || self.backend.update_resource(handle, spec, &token))
            .await?;
        self.await_ready(handle, logical_name).await?;
        self.record(logical_name, handle, ResourceStatus::Ready)?;
        debug!(name = %logical_name, %handle, "update applied");
        Ok(())
    }

    /// Delete a resource and drop its record.
    pub async fn destroy(&self, handle: &ResourceHandle, logical_name: &str) -> ProvisionResult<()> {
        self.policy
            .run(logical_name, || self.backend.delete_resource(handle))
            .await?;
        if let Some(store) = &self.state {
            store.delete_resource(logical_name)?;
        }
        info!(name = %logical_name, %handle, "resource destroyed");
        Ok(())
    }

    /// Poll `describe` until the resource is ready or the poll budget runs out.
    pub async fn await_ready(&self, handle: &ResourceHandle, name: &str) -> ProvisionResult<()> {
        for poll in 0..self.policy.ready_polls {
            let status = self
                .policy
                .run(name, || self.backend.describe_resource(handle))
                .await?;
            match status {
                ResourceStatus::Ready => return Ok(()),
                ResourceStatus::Failed => {
                    warn!(%name, %handle, "resource failed");
                    return Err(ProvisionError::ResourceFailed(name.to_string()));
                }
                ResourceStatus::Deleted => {
                    return Err(ProvisionError::UnknownHandle(handle.to_string()));
                }
                ResourceStatus::Pending => {
                    debug!(%name, poll, "resource pending");
                    tokio::time::sleep(self.policy.base_delay).await;
                }
            }
        }
        warn!(%name, %handle, polls = self.policy.ready_polls, "resource never became ready");
        Err(ProvisionError::Timeout {
            name: name.to_string(),
            attempts: self.policy.ready_polls,
        })
    }

    fn record(&self, name: &str, handle: &ResourceHandle, status: ResourceStatus) -> ProvisionResult<()> {
        if let Some(store) = &self.state {
            store.put_resource(&ResourceRecord {
                logical_name: name.to_string(),
                kind: handle.kind,
                handle: handle.id.clone(),
                status,
                updated_at: now_secs(),
            })?;
        }
        Ok(())
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use flipgate_core::ResourceKind;
    use serde_json::json;

    struct Boundary(&'static str);

    impl Provisionable for Boundary {
        fn resource_kind(&self) -> ResourceKind {
            ResourceKind::SecurityGroup
        }
        fn logical_name(&self) -> String {
            format!("Dev-sg-{}", self.0)
        }
        fn resource_spec(&self) -> serde_json::Value {
            json!({ "role": self.0 })
        }
    }

    fn setup(backend: Arc<InMemoryBackend>) -> Provisioner {
        Provisioner::new(
            DeploymentContext::new("Dev", "123456789012", "ap-northeast-1"),
            backend,
            RetryPolicy::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn provision_waits_for_ready_and_records() {
        let backend = Arc::new(InMemoryBackend::new().with_settle_after(3));
        let store = StateStore::open_in_memory().unwrap();
        let p = setup(backend.clone()).with_state(store.clone());

        let handle = p.provision(&Boundary("ingress")).await.unwrap();
        assert_eq!(backend.status_of(&handle), Some(ResourceStatus::Ready));

        let rec = store.get_resource("Dev-sg-ingress").unwrap().unwrap();
        assert_eq!(rec.handle, handle.id);
        assert_eq!(rec.status, ResourceStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn provisioning_twice_reuses_the_resource() {
        let backend = Arc::new(InMemoryBackend::new());
        let p = setup(backend.clone());
        let a = p.provision(&Boundary("ingress")).await.unwrap();
        let b = p.provision(&Boundary("ingress")).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(backend.count(ResourceKind::SecurityGroup), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_create_failures_do_not_duplicate() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.fail_creates(ResourceKind::SecurityGroup, 2);
        let p = setup(backend.clone());
        p.provision(&Boundary("container")).await.unwrap();
        assert_eq!(backend.count(ResourceKind::SecurityGroup), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn never_ready_resource_times_out() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.never_ready(ResourceKind::SecurityGroup);
        let p = setup(backend);
        let err = p.provision(&Boundary("database")).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Timeout { attempts: 30, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn update_and_destroy() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = StateStore::open_in_memory().unwrap();
        let p = setup(backend.clone()).with_state(store.clone());
        let h = p.provision(&Boundary("egress")).await.unwrap();

        p.update(&h, "Dev-sg-egress", &json!({ "role": "egress", "v": 2 }))
            .await
            .unwrap();
        assert_eq!(backend.spec_of(&h).unwrap()["v"], 2);

        p.destroy(&h, "Dev-sg-egress").await.unwrap();
        assert_eq!(backend.status_of(&h), Some(ResourceStatus::Deleted));
        assert!(store.get_resource("Dev-sg-egress").unwrap().is_none());
    }
}
