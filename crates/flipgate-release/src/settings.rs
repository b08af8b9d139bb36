//! Release timing and health gate settings.

use std::sync::Arc;
use std::time::Duration;

use flipgate_core::config::ReleaseConfig;
use flipgate_core::parse_duration;
use flipgate_health::{HealthGate, Prober};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseSettings {
    /// Bake time before a release completes on its own.
    pub approval_wait: Duration,
    /// Delay between completion and old color teardown.
    pub termination_wait: Duration,
    pub health_grace: Duration,
    pub health_max_rounds: u32,
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            approval_wait: Duration::from_secs(10 * 60),
            termination_wait: Duration::from_secs(69 * 60),
            health_grace: Duration::ZERO,
            health_max_rounds: 20,
        }
    }
}

impl ReleaseSettings {
    /// Overlay `[release]` settings on the defaults.
    pub fn from_config(config: Option<&ReleaseConfig>) -> Self {
        let mut settings = Self::default();
        let Some(config) = config else {
            return settings;
        };
        if let Some(d) = config.approval_wait.as_deref().and_then(parse_duration) {
            settings.approval_wait = d;
        }
        if let Some(d) = config.termination_wait.as_deref().and_then(parse_duration) {
            settings.termination_wait = d;
        }
        if let Some(d) = config.health_check_grace.as_deref().and_then(parse_duration) {
            settings.health_grace = d;
        }
        if let Some(n) = config.health_check_max_rounds {
            settings.health_max_rounds = n.max(1);
        }
        settings
    }

    pub fn health_gate(&self, prober: Arc<dyn Prober>) -> HealthGate {
        HealthGate::new(prober, self.health_grace, self.health_max_rounds)
    }
}
