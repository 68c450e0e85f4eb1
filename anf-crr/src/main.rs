//! anf-crr: sets up cross-region replication between two NetApp volumes.
//!
//! Runs against the in-process simulated control plane. The eventual
//! consistency delay of the simulation is set with `--latency-ms`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use anf_crr::{CrrConfig, CrrWorkflow, SimulatedAnf};

/// NetApp cross-region replication
#[derive(Parser, Debug)]
#[command(name = "anf-crr", version, about)]
struct Args {
    /// Path to the JSON workflow configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Delete all created resources at the end
    #[arg(long)]
    cleanup: bool,

    /// Break the replication once it is mirrored
    #[arg(long)]
    break_replication: bool,

    /// Seconds to wait before each status lookup (overrides the config file)
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Maximum lookups per wait (overrides the config file)
    #[arg(long)]
    poll_retries: Option<u32>,

    /// Simulated control plane convergence delay in milliseconds
    #[arg(long, default_value = "2000")]
    latency_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "anf_crr=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = CrrConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    config.cleanup |= args.cleanup;
    config.break_replication |= args.break_replication;
    if let Some(interval) = args.poll_interval {
        config.poll.interval_secs = interval;
    }
    if let Some(retries) = args.poll_retries {
        config.poll.retries = retries;
    }
    config.validate()?;

    info!(
        subscription = %config.subscription_id,
        primary = %config.primary.location,
        secondary = %config.secondary.location,
        "Starting cross-region replication setup"
    );

    let anf = SimulatedAnf::new(
        config.subscription_id.clone(),
        Duration::from_millis(args.latency_ms),
    );
    let report = CrrWorkflow::new(&anf, &config).run().await?;

    info!(
        source = %report.primary.volume_id,
        destination = %report.secondary.volume_id,
        broken = report.broken,
        cleaned_up = report.cleaned_up,
        "Workflow completed"
    );
    for id in &report.unconfirmed_deletions {
        warn!(resource_id = %id, "Deletion was not confirmed");
    }

    Ok(())
}
