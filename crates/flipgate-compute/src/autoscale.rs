//! Autoscaler: CPU target tracking for compute pools.
//!
//! Each tick reads the average CPU utilization of every pool that has a
//! scaling policy, compares it with the policy's target and asks the
//! [`ComputeManager`] for a new replica count. Scale-out and scale-in
//! have separate cooldowns. The result is always clamped to the policy
//! bounds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::pool::{ComputeManager, ComputePoolHandle, ScalingPolicy};

pub const DEFAULT_SCALE_OUT_COOLDOWN: Duration = Duration::from_secs(60);
pub const DEFAULT_SCALE_IN_COOLDOWN: Duration = Duration::from_secs(300);

/// Fraction of the target tolerated before acting.
const TOLERANCE: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Scale to the specified replica count.
    ScaleTo(u32),
    NoChange,
}

/// Where CPU utilization comes from.
pub trait CpuSource: Send + Sync {
    /// Average CPU percent across the pool's replicas, if known.
    fn cpu_percent(&self, pool: &ComputePoolHandle) -> Option<f64>;
}

/// Fixed per-pool readings. Used by the in-memory deployment and tests.
#[derive(Default)]
pub struct StaticCpu {
    readings: Mutex<HashMap<ComputePoolHandle, f64>>,
}

impl StaticCpu {
    pub fn set(&self, pool: &ComputePoolHandle, percent: f64) {
        self.readings
            .lock()
            .expect("cpu readings lock")
            .insert(pool.clone(), percent);
    }
}

impl CpuSource for StaticCpu {
    fn cpu_percent(&self, pool: &ComputePoolHandle) -> Option<f64> {
        self.readings.lock().expect("cpu readings lock").get(pool).copied()
    }
}

/// One reading per service, shared by every revision of its pools.
#[derive(Default)]
pub struct ServiceCpu {
    readings: HashMap<String, f64>,
}

impl ServiceCpu {
    pub fn new(readings: impl IntoIterator<Item = (String, f64)>) -> Self {
        Self {
            readings: readings.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

impl CpuSource for ServiceCpu {
    fn cpu_percent(&self, pool: &ComputePoolHandle) -> Option<f64> {
        self.readings.get(&pool.service).copied()
    }
}

/// Per-pool cooldown tracking.
#[derive(Default)]
struct ScaleState {
    last_scale_out: Option<Instant>,
    last_scale_in: Option<Instant>,
}

fn cooled(last: Option<Instant>, cooldown: Duration, now: Instant) -> bool {
    last.is_none_or(|t| now.duration_since(t) >= cooldown)
}

pub struct Autoscaler {
    scale_out_cooldown: Duration,
    scale_in_cooldown: Duration,
    states: HashMap<ComputePoolHandle, ScaleState>,
}

impl Default for Autoscaler {
    fn default() -> Self {
        Self::new(DEFAULT_SCALE_OUT_COOLDOWN, DEFAULT_SCALE_IN_COOLDOWN)
    }
}

impl Autoscaler {
    pub fn new(scale_out_cooldown: Duration, scale_in_cooldown: Duration) -> Self {
        Self {
            scale_out_cooldown,
            scale_in_cooldown,
            states: HashMap::new(),
        }
    }

    /// Decide a replica count for one pool.
    pub fn evaluate(
        &mut self,
        pool: &ComputePoolHandle,
        policy: &ScalingPolicy,
        current: u32,
        cpu_percent: f64,
    ) -> ScaleDecision {
        let now = Instant::now();
        let state = self.states.entry(pool.clone()).or_default();

        // Out of bounds is corrected regardless of cooldowns.
        let bounded = policy.clamp(current);
        if bounded != current {
            debug!(%pool, from = current, to = bounded, "restoring scaling bounds");
            return ScaleDecision::ScaleTo(bounded);
        }
        if current == 0 || policy.target_cpu_percent <= 0.0 {
            return ScaleDecision::NoChange;
        }

        let target = policy.target_cpu_percent;
        let ratio = cpu_percent / target;
        let desired = policy.clamp(((current as f64) * ratio).ceil() as u32);

        if cpu_percent > target * (1.0 + TOLERANCE)
            && desired > current
            && cooled(state.last_scale_out, self.scale_out_cooldown, now)
        {
            state.last_scale_out = Some(now);
            debug!(%pool, from = current, to = desired, cpu = cpu_percent, target, "scaling out");
            return ScaleDecision::ScaleTo(desired);
        }

        if cpu_percent < target * (1.0 - TOLERANCE)
            && desired < current
            && cooled(state.last_scale_in, self.scale_in_cooldown, now)
        {
            state.last_scale_in = Some(now);
            debug!(%pool, from = current, to = desired, cpu = cpu_percent, target, "scaling in");
            return ScaleDecision::ScaleTo(desired);
        }

        ScaleDecision::NoChange
    }

    /// Evaluate every scaled pool and apply the decisions.
    pub async fn tick(
        &mut self,
        manager: &ComputeManager,
        cpu: &dyn CpuSource,
    ) -> Vec<(ComputePoolHandle, ScaleDecision)> {
        let mut decisions = Vec::new();
        self.states.retain(|handle, _| manager.get(handle).is_some());

        for handle in manager.handles() {
            let Some(pool) = manager.get(&handle) else {
                continue;
            };
            let Some(policy) = pool.scaling else {
                continue;
            };
            let Some(percent) = cpu.cpu_percent(&handle) else {
                continue;
            };

            let decision = self.evaluate(&handle, &policy, pool.replica_count(), percent);
            if let ScaleDecision::ScaleTo(count) = decision
                && let Err(e) = manager.set_desired(&handle, count).await
            {
                warn!(pool = %handle, count, error = %e, "scaling action failed");
            }
            decisions.push((handle, decision));
        }
        decisions
    }

    /// Run the autoscaler loop until `shutdown` flips.
    pub async fn run(
        mut self,
        manager: Arc<ComputeManager>,
        cpu: Arc<dyn CpuSource>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(interval_secs = interval.as_secs(), "autoscaler started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.tick(&manager, cpu.as_ref()).await;
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }
}
