//! `flipgated serve`: build the topology and serve the operator API.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use flipgate_api::ApiState;
use flipgate_compute::{Autoscaler, ServiceCpu};
use flipgate_core::{DeploymentContext, FlipgateConfig};
use flipgate_health::{HttpProber, Prober, ScriptedProber};
use flipgate_provision::{InMemoryBackend, Provisioner, RetryPolicy};
use flipgate_release::{ReleaseOrchestrator, ReleaseSettings};
use flipgate_state::StateStore;
use flipgate_topology::TopologyBuilder;

pub struct ServeOptions {
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    pub autoscale_interval: u64,
    pub http_probes: bool,
    /// Per-service CPU percent for the autoscaler.
    pub cpu: Vec<(String, f64)>,
}

/// `backend=75` -> `("backend", 75.0)`.
pub fn parse_cpu_reading(s: &str) -> Result<(String, f64), String> {
    let (service, percent) = s
        .split_once('=')
        .ok_or_else(|| format!("expected SERVICE=PERCENT, got {s:?}"))?;
    let percent: f64 = percent
        .trim()
        .parse()
        .map_err(|e| format!("bad CPU percent {percent:?}: {e}"))?;
    if service.trim().is_empty() || !(0.0..=100.0).contains(&percent) {
        return Err(format!("expected SERVICE=PERCENT with PERCENT in 0..=100, got {s:?}"));
    }
    Ok((service.trim().to_string(), percent))
}

pub async fn run(cfg: FlipgateConfig, opts: ServeOptions) -> anyhow::Result<()> {
    info!(stage = %cfg.deployment.stage, region = %cfg.deployment.region, "Flipgate daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    // State store.
    let store = match &opts.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let db_path = dir.join("flipgate.redb");
            let store = StateStore::open(&db_path)?;
            info!(path = ?db_path, "state store opened");
            store
        }
        None => {
            info!("state store in memory");
            StateStore::open_in_memory()?
        }
    };

    // Topology.
    let ctx = DeploymentContext::from_config(&cfg.deployment);
    let provisioner = Provisioner::new(
        ctx,
        Arc::new(InMemoryBackend::new()),
        RetryPolicy::from_config(cfg.provisioning.as_ref()),
    )
    .with_state(store.clone());
    let topology = Arc::new(TopologyBuilder::from_config(provisioner, &cfg)?.build().await?);
    info!(services = topology.services.len(), "topology built");

    // Release orchestrator.
    let prober: Arc<dyn Prober> = if opts.http_probes {
        Arc::new(HttpProber)
    } else {
        Arc::new(ScriptedProber::healthy())
    };
    let settings = ReleaseSettings::from_config(cfg.release.as_ref());
    info!(
        approval_wait_secs = settings.approval_wait.as_secs(),
        termination_wait_secs = settings.termination_wait.as_secs(),
        "release orchestrator initialized"
    );
    let releases = ReleaseOrchestrator::new(&topology, settings.health_gate(prober), settings, store)?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    // Autoscaler loop. Pools without a CPU reading are left alone.
    for (service, _) in &opts.cpu {
        if topology.service(service).is_none() {
            anyhow::bail!("--cpu names unknown service {service}");
        }
    }
    let cpu = ServiceCpu::new(opts.cpu);
    if cpu.is_empty() {
        warn!("no CPU readings configured, autoscaler is idle");
    }
    let compute = Arc::clone(&topology.compute);
    let interval = Duration::from_secs(opts.autoscale_interval);
    let autoscale_handle = tokio::spawn(async move {
        Autoscaler::default()
            .run(compute, Arc::new(cpu), interval, shutdown_rx)
            .await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = flipgate_api::build_router(ApiState { releases, topology });
    let addr = SocketAddr::from(([0, 0, 0, 0], opts.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = autoscale_handle.await;

    info!("Flipgate daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_readings_parse() {
        assert_eq!(parse_cpu_reading("backend=75").unwrap(), ("backend".to_string(), 75.0));
        assert_eq!(parse_cpu_reading(" frontend = 12.5").unwrap(), ("frontend".to_string(), 12.5));
        assert!(parse_cpu_reading("backend").is_err());
        assert!(parse_cpu_reading("backend=hot").is_err());
        assert!(parse_cpu_reading("backend=150").is_err());
        assert!(parse_cpu_reading("=50").is_err());
    }
}
