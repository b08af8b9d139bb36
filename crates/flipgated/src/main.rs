//! flipgated — the Flipgate daemon.
//!
//! Single binary that assembles the Flipgate subsystems:
//! - Subnet plan and security policy (printed by `plan`)
//! - Provisioner over the in-memory backend
//! - Topology build: network, routes, endpoints, routers, compute
//! - Release orchestrator and state store (redb)
//! - Autoscaler
//! - REST API
//!
//! # Usage
//!
//! ```text
//! flipgated init --stage Dev
//! flipgated plan --config flipgate.toml
//! flipgated serve --config flipgate.toml --port 8080
//! ```

mod plan;
mod serve;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::info;

use flipgate_core::FlipgateConfig;

#[derive(Parser)]
#[command(name = "flipgated", about = "Flipgate blue/green release daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the subnet plan and security edges for a config.
    Plan {
        /// Path to flipgate.toml.
        #[arg(long, default_value = "flipgate.toml")]
        config: PathBuf,

        /// Emit JSON instead of tables.
        #[arg(long)]
        json: bool,
    },

    /// Build the topology against the in-memory backend and serve the API.
    Serve {
        /// Path to flipgate.toml.
        #[arg(long, default_value = "flipgate.toml")]
        config: PathBuf,

        /// Port to listen on.
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Data directory for release state. In-memory when omitted.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Autoscaler check interval in seconds.
        #[arg(long, default_value = "60")]
        autoscale_interval: u64,

        /// Probe replicas over HTTP instead of treating them as healthy.
        #[arg(long)]
        http_probes: bool,

        /// CPU reading fed to the autoscaler, as SERVICE=PERCENT. Repeatable.
        #[arg(long = "cpu", value_parser = serve::parse_cpu_reading)]
        cpu: Vec<(String, f64)>,
    },

    /// Write a scaffold flipgate.toml.
    Init {
        /// Output path.
        #[arg(long, default_value = "flipgate.toml")]
        path: PathBuf,

        /// Stage name used as the resource name prefix.
        #[arg(long, default_value = "Dev")]
        stage: String,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flipgated=debug,flipgate=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Plan { config, json } => {
            let cfg = FlipgateConfig::from_file(&config)?;
            print!("{}", plan::render(&cfg, json)?);
            Ok(())
        }
        Command::Serve {
            config,
            port,
            data_dir,
            autoscale_interval,
            http_probes,
            cpu,
        } => {
            let cfg = FlipgateConfig::from_file(&config)?;
            serve::run(
                cfg,
                serve::ServeOptions {
                    port,
                    data_dir,
                    autoscale_interval,
                    http_probes,
                    cpu,
                },
            )
            .await
        }
        Command::Init { path, stage, force } => init(&path, &stage, force),
    }
}

fn init(path: &Path, stage: &str, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let cfg = FlipgateConfig::scaffold(stage);
    std::fs::write(path, cfg.to_toml_string()?)?;
    info!(path = %path.display(), %stage, "scaffold written");
    Ok(())
}
