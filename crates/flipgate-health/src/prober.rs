//! Probe implementations behind a common trait.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use flipgate_core::HealthCheckPolicy;

use crate::checker::{ProbeResult, http_probe};

/// Something that can probe a replica endpoint once.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, endpoint: &str, policy: &HealthCheckPolicy) -> ProbeResult;
}

/// Probes over HTTP.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpProber;

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, endpoint: &str, policy: &HealthCheckPolicy) -> ProbeResult {
        http_probe(endpoint, policy).await
    }
}

/// Returns canned results per endpoint, then a fallback.
///
/// Used where no real replicas exist: the in-memory deployment and tests.
pub struct ScriptedProber {
    inner: Mutex<Scripted>,
}

struct Scripted {
    fallback: ProbeResult,
    scripts: HashMap<String, VecDeque<ProbeResult>>,
    calls: u32,
}

impl ScriptedProber {
    /// Every probe returns `fallback` unless a script says otherwise.
    pub fn new(fallback: ProbeResult) -> Self {
        Self {
            inner: Mutex::new(Scripted {
                fallback,
                scripts: HashMap::new(),
                calls: 0,
            }),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ProbeResult::Healthy)
    }

    /// Queue results for one endpoint, consumed in order.
    pub fn script(&self, endpoint: &str, results: impl IntoIterator<Item = ProbeResult>) {
        self.inner
            .lock()
            .expect("prober lock")
            .scripts
            .entry(endpoint.to_string())
            .or_default()
            .extend(results);
    }

    pub fn set_fallback(&self, fallback: ProbeResult) {
        self.inner.lock().expect("prober lock").fallback = fallback;
    }

    /// Total probes served.
    pub fn calls(&self) -> u32 {
        self.inner.lock().expect("prober lock").calls
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, endpoint: &str, _policy: &HealthCheckPolicy) -> ProbeResult {
        let mut inner = self.inner.lock().expect("prober lock");
        inner.calls += 1;
        let fallback = inner.fallback;
        inner
            .scripts
            .get_mut(endpoint)
            .and_then(|q| q.pop_front())
            .unwrap_or(fallback)
    }
}
