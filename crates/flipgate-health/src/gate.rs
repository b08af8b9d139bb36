//! The pre-cutover health gate.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use flipgate_core::HealthCheckPolicy;

use crate::checker::{HealthStatus, HealthTracker};
use crate::error::{HealthError, HealthResult};
use crate::prober::Prober;

/// Blocks until every endpoint of a candidate pool reports healthy.
///
/// Probes run at the start of each round and rounds are one policy
/// interval apart, so with the default policy the earliest pass is two
/// intervals after the first probe.
#[derive(Clone)]
pub struct HealthGate {
    prober: Arc<dyn Prober>,
    /// Wait before the first probe.
    grace: Duration,
    max_rounds: u32,
}

impl HealthGate {
    pub fn new(prober: Arc<dyn Prober>, grace: Duration, max_rounds: u32) -> Self {
        Self {
            prober,
            grace,
            max_rounds: max_rounds.max(1),
        }
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    /// Probe `endpoints` until all are healthy. Returns the rounds used.
    pub async fn wait_until_healthy(
        &self,
        target: &str,
        endpoints: &[String],
        policy: &HealthCheckPolicy,
    ) -> HealthResult<u32> {
        if endpoints.is_empty() {
            return Err(HealthError::HealthCheckFailed {
                target: target.to_string(),
                reason: "no replicas registered".to_string(),
            });
        }
        if !self.grace.is_zero() {
            debug!(%target, grace = ?self.grace, "health check grace period");
            tokio::time::sleep(self.grace).await;
        }

        let mut trackers: Vec<HealthTracker> =
            endpoints.iter().map(|_| HealthTracker::new(policy)).collect();

        for round in 1..=self.max_rounds {
            for (endpoint, tracker) in endpoints.iter().zip(trackers.iter_mut()) {
                let result = self.prober.probe(endpoint, policy).await;
                tracker.record(result);
            }

            let healthy = trackers
                .iter()
                .filter(|t| t.status() == HealthStatus::Healthy)
                .count();
            debug!(%target, round, healthy, total = endpoints.len(), "health round");
            if healthy == endpoints.len() {
                info!(%target, rounds = round, "candidate healthy");
                return Ok(round);
            }
            if round < self.max_rounds {
                tokio::time::sleep(policy.interval).await;
            }
        }

        let unhealthy: Vec<&str> = endpoints
            .iter()
            .zip(&trackers)
            .filter(|(_, t)| t.status() != HealthStatus::Healthy)
            .map(|(e, _)| e.as_str())
            .collect();
        warn!(%target, rounds = self.max_rounds, ?unhealthy, "candidate never became healthy");
        Err(HealthError::HealthCheckFailed {
            target: target.to_string(),
            reason: format!(
                "{} of {} replicas unhealthy after {} rounds",
                unhealthy.len(),
                endpoints.len(),
                self.max_rounds
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::ProbeResult;
    use crate::prober::ScriptedProber;
    use tokio::time::Instant;

    fn endpoints() -> Vec<String> {
        vec!["10.0.8.10:80".to_string(), "10.0.9.10:80".to_string()]
    }

    #[tokio::test(start_paused = true)]
    async fn passes_after_three_successes_at_fifteen_second_interval() {
        let gate = HealthGate::new(Arc::new(ScriptedProber::healthy()), Duration::ZERO, 20);
        let start = Instant::now();
        let rounds = gate
            .wait_until_healthy("backend-green", &endpoints(), &HealthCheckPolicy::default())
            .await
            .unwrap();
        assert_eq!(rounds, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn grace_period_delays_first_probe() {
        let gate = HealthGate::new(
            Arc::new(ScriptedProber::healthy()),
            Duration::from_secs(60),
            20,
        );
        let start = Instant::now();
        gate.wait_until_healthy("backend-green", &endpoints(), &HealthCheckPolicy::default())
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn one_bad_replica_fails_the_gate() {
        let prober = ScriptedProber::healthy();
        prober.script("10.0.9.10:80", std::iter::repeat_n(ProbeResult::Unhealthy, 5));
        let gate = HealthGate::new(Arc::new(prober), Duration::ZERO, 5);
        let err = gate
            .wait_until_healthy("backend-green", &endpoints(), &HealthCheckPolicy::default())
            .await
            .unwrap_err();
        let HealthError::HealthCheckFailed { target, reason } = err;
        assert_eq!(target, "backend-green");
        assert!(reason.contains("1 of 2"), "{reason}");
    }

    #[tokio::test(start_paused = true)]
    async fn flapping_replica_needs_a_fresh_streak() {
        let prober = ScriptedProber::healthy();
        prober.script(
            "10.0.8.10:80",
            [ProbeResult::Healthy, ProbeResult::Healthy, ProbeResult::Failed],
        );
        let gate = HealthGate::new(Arc::new(prober), Duration::ZERO, 20);
        let rounds = gate
            .wait_until_healthy("backend-green", &endpoints(), &HealthCheckPolicy::default())
            .await
            .unwrap();
        assert_eq!(rounds, 6);
    }

    #[tokio::test]
    async fn empty_pool_fails_immediately() {
        let gate = HealthGate::new(Arc::new(ScriptedProber::healthy()), Duration::ZERO, 20);
        assert!(
            gate.wait_until_healthy("backend-green", &[], &HealthCheckPolicy::default())
                .await
                .is_err()
        );
    }
}
