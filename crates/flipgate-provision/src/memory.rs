//! In-memory provisioning backend.
//!
//! Behaves like a real control API where it matters: creation is
//! idempotent per request token, new and updated resources report
//! `Pending` for a configurable number of `describe` calls before turning
//! `Ready`, and faults can be injected per resource kind or handle.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use flipgate_core::ResourceKind;
use flipgate_state::ResourceStatus;

use crate::backend::{BackendError, ProvisioningBackend, RequestToken, ResourceHandle};

struct Entry {
    kind: ResourceKind,
    spec: serde_json::Value,
    status: ResourceStatus,
    /// Describes left before a pending resource turns ready.
    pending_describes: u32,
    updates: u32,
}

#[derive(Default)]
struct Faults {
    /// Remaining transient failures for creates of a kind.
    create: HashMap<ResourceKind, u32>,
    /// Remaining transient failures for updates of a handle.
    update: HashMap<String, u32>,
    /// Handles whose updates are permanently rejected.
    reject_update: HashSet<String>,
    /// Kinds that never leave `Pending`.
    never_ready: HashSet<ResourceKind>,
}

struct Inner {
    resources: HashMap<String, Entry>,
    create_tokens: HashMap<String, ResourceHandle>,
    update_tokens: HashSet<String>,
    next_id: u64,
    settle_after: u32,
    faults: Faults,
}

/// Provisioning backend that keeps everything in process memory.
pub struct InMemoryBackend {
    inner: Mutex<Inner>,
}

impl InMemoryBackend {
    /// A backend whose resources are ready on the first describe.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                resources: HashMap::new(),
                create_tokens: HashMap::new(),
                update_tokens: HashSet::new(),
                next_id: 1,
                settle_after: 0,
                faults: Faults::default(),
            }),
        }
    }

    /// Resources report `Pending` for `describes` calls after each change.
    pub fn with_settle_after(self, describes: u32) -> Self {
        self.inner.lock().expect("backend lock").settle_after = describes;
        self
    }

    /// Fail the next `count` creates of `kind` with a transient error.
    pub fn fail_creates(&self, kind: ResourceKind, count: u32) {
        self.inner
            .lock()
            .expect("backend lock")
            .faults
            .create
            .insert(kind, count);
    }

    /// Fail the next `count` updates of `handle` with a transient error.
    pub fn fail_updates(&self, handle: &ResourceHandle, count: u32) {
        self.inner
            .lock()
            .expect("backend lock")
            .faults
            .update
            .insert(handle.id.clone(), count);
    }

    /// Reject every future update of `handle`.
    pub fn reject_updates(&self, handle: &ResourceHandle) {
        self.inner
            .lock()
            .expect("backend lock")
            .faults
            .reject_update
            .insert(handle.id.clone());
    }

    /// Stop rejecting updates of `handle`.
    pub fn accept_updates(&self, handle: &ResourceHandle) {
        let mut inner = self.inner.lock().expect("backend lock");
        inner.faults.reject_update.remove(&handle.id);
        inner.faults.update.remove(&handle.id);
    }

    /// Resources of `kind` never become ready.
    pub fn never_ready(&self, kind: ResourceKind) {
        self.inner
            .lock()
            .expect("backend lock")
            .faults
            .never_ready
            .insert(kind);
    }

    /// Last applied spec of a resource.
    pub fn spec_of(&self, handle: &ResourceHandle) -> Option<serde_json::Value> {
        let inner = self.inner.lock().expect("backend lock");
        inner.resources.get(&handle.id).map(|e| e.spec.clone())
    }

    pub fn status_of(&self, handle: &ResourceHandle) -> Option<ResourceStatus> {
        let inner = self.inner.lock().expect("backend lock");
        inner.resources.get(&handle.id).map(|e| e.status)
    }

    /// Number of applied updates for a resource.
    pub fn update_count(&self, handle: &ResourceHandle) -> u32 {
        let inner = self.inner.lock().expect("backend lock");
        inner.resources.get(&handle.id).map(|e| e.updates).unwrap_or(0)
    }

    /// Number of live (not deleted) resources of a kind.
    pub fn count(&self, kind: ResourceKind) -> usize {
        let inner = self.inner.lock().expect("backend lock");
        inner
            .resources
            .values()
            .filter(|e| e.kind == kind && e.status != ResourceStatus::Deleted)
            .count()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn take_fault<K: std::hash::Hash + Eq>(map: &mut HashMap<K, u32>, key: &K) -> bool {
    match map.get_mut(key) {
        Some(n) if *n > 0 => {
            *n -= 1;
            true
        }
        _ => false,
    }
}

#[async_trait]
impl ProvisioningBackend for InMemoryBackend {
    async fn create_resource(
        &self,
        kind: ResourceKind,
        spec: &serde_json::Value,
        token: &RequestToken,
    ) -> Result<ResourceHandle, BackendError> {
        let mut inner = self.inner.lock().expect("backend lock");

        if let Some(existing) = inner.create_tokens.get(token.as_str()) {
            debug!(%token, handle = %existing, "create replayed");
            return Ok(existing.clone());
        }
        if take_fault(&mut inner.faults.create, &kind) {
            return Err(BackendError::Transient(format!("throttled creating {kind}")));
        }

        let id = format!("{kind}-{:04}", inner.next_id);
        inner.next_id += 1;
        let handle = ResourceHandle { kind, id: id.clone() };
        let pending_describes = inner.settle_after;
        inner.resources.insert(
            id,
            Entry {
                kind,
                spec: spec.clone(),
                status: ResourceStatus::Pending,
                pending_describes,
                updates: 0,
            },
        );
        inner
            .create_tokens
            .insert(token.as_str().to_string(), handle.clone());
        debug!(%token, %handle, "resource created");
        Ok(handle)
    }

    async fn update_resource(
        &self,
        handle: &ResourceHandle,
        spec: &serde_json::Value,
        token: &RequestToken,
    ) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().expect("backend lock");

        if inner.update_tokens.contains(token.as_str()) {
            return Ok(());
        }
        if inner.faults.reject_update.contains(&handle.id) {
            return Err(BackendError::Rejected(format!("update of {handle} denied")));
        }
        if take_fault(&mut inner.faults.update, &handle.id) {
            return Err(BackendError::Transient(format!("throttled updating {handle}")));
        }

        let settle_after = inner.settle_after;
        let entry = inner
            .resources
            .get_mut(&handle.id)
            .filter(|e| e.status != ResourceStatus::Deleted)
            .ok_or_else(|| BackendError::NotFound(handle.to_string()))?;
        entry.spec = spec.clone();
        entry.updates += 1;
        if settle_after > 0 {
            entry.status = ResourceStatus::Pending;
            entry.pending_describes = settle_after;
        }
        inner.update_tokens.insert(token.as_str().to_string());
        Ok(())
    }

    async fn describe_resource(
        &self,
        handle: &ResourceHandle,
    ) -> Result<ResourceStatus, BackendError> {
        let mut inner = self.inner.lock().expect("backend lock");
        let stuck = inner.faults.never_ready.contains(&handle.kind);
        let entry = inner
            .resources
            .get_mut(&handle.id)
            .ok_or_else(|| BackendError::NotFound(handle.to_string()))?;

        if entry.status == ResourceStatus::Pending && !stuck {
            if entry.pending_describes == 0 {
                entry.status = ResourceStatus::Ready;
            } else {
                entry.pending_describes -= 1;
            }
        }
        Ok(entry.status)
    }

    async fn delete_resource(&self, handle: &ResourceHandle) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().expect("backend lock");
        if let Some(entry) = inner.resources.get_mut(&handle.id) {
            entry.status = ResourceStatus::Deleted;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_is_idempotent_per_token() {
        let backend = InMemoryBackend::new();
        let token = RequestToken::new("Dev/sg-ingress");
        let a = backend
            .create_resource(ResourceKind::SecurityGroup, &json!({}), &token)
            .await
            .unwrap();
        let b = backend
            .create_resource(ResourceKind::SecurityGroup, &json!({}), &token)
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(backend.count(ResourceKind::SecurityGroup), 1);
    }

    #[tokio::test]
    async fn resources_settle_after_describes() {
        let backend = InMemoryBackend::new().with_settle_after(2);
        let h = backend
            .create_resource(ResourceKind::Subnet, &json!({}), &RequestToken::new("t"))
            .await
            .unwrap();
        assert_eq!(backend.describe_resource(&h).await.unwrap(), ResourceStatus::Pending);
        assert_eq!(backend.describe_resource(&h).await.unwrap(), ResourceStatus::Pending);
        assert_eq!(backend.describe_resource(&h).await.unwrap(), ResourceStatus::Ready);
    }

    #[tokio::test]
    async fn injected_create_faults_are_transient() {
        let backend = InMemoryBackend::new();
        backend.fail_creates(ResourceKind::Listener, 1);
        let token = RequestToken::new("l");
        let err = backend
            .create_resource(ResourceKind::Listener, &json!({}), &token)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(
            backend
                .create_resource(ResourceKind::Listener, &json!({}), &token)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn update_replay_applies_once() {
        let backend = InMemoryBackend::new();
        let h = backend
            .create_resource(ResourceKind::Listener, &json!({"target": "blue"}), &RequestToken::new("l"))
            .await
            .unwrap();
        let token = RequestToken::new("l/update/1");
        backend.update_resource(&h, &json!({"target": "green"}), &token).await.unwrap();
        backend.update_resource(&h, &json!({"target": "green"}), &token).await.unwrap();
        assert_eq!(backend.update_count(&h), 1);
        assert_eq!(backend.spec_of(&h).unwrap()["target"], "green");
    }

    #[tokio::test]
    async fn rejected_updates_leave_spec_untouched() {
        let backend = InMemoryBackend::new();
        let h = backend
            .create_resource(ResourceKind::Listener, &json!({"target": "blue"}), &RequestToken::new("l"))
            .await
            .unwrap();
        backend.reject_updates(&h);
        let err = backend
            .update_resource(&h, &json!({"target": "green"}), &RequestToken::new("u"))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(backend.spec_of(&h).unwrap()["target"], "blue");
    }

    #[tokio::test]
    async fn delete_marks_deleted() {
        let backend = InMemoryBackend::new();
        let h = backend
            .create_resource(ResourceKind::ComputeService, &json!({}), &RequestToken::new("c"))
            .await
            .unwrap();
        backend.delete_resource(&h).await.unwrap();
        backend.delete_resource(&h).await.unwrap();
        assert_eq!(backend.status_of(&h), Some(ResourceStatus::Deleted));
        assert_eq!(backend.count(ResourceKind::ComputeService), 0);
    }
}
