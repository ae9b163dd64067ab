//! swarm-node — single-process coordinator binary.
//!
//! Startup sequence:
//!   1. Strip policy-bypass environment variables
//!   2. Open state: plan log, epochs, DECIDE register, leases, ledger,
//!      challenge queue/windows, CAS, audit log
//!   3. Start the lease monitor
//!   4. Run the intake loop: validate inbound envelopes → dispatch

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use swarm_coordinator::{Coordinator, CoordinatorConfig, LocalTransport};

#[derive(Parser, Debug)]
#[command(
    name = "swarm-node",
    version,
    about = "Swarm coordinator — the verb pipeline for decentralized task execution"
)]
struct Args {
    /// Directory for persistent protocol state.
    #[arg(long, default_value = ".state")]
    state_dir: PathBuf,

    /// Directory for the content-addressed artifact store.
    #[arg(long, default_value = ".cas")]
    cas_dir: PathBuf,

    /// Directory for the signed audit log.
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Directory for per-agent keypairs.
    #[arg(long, default_value = ".keys")]
    keys_dir: PathBuf,

    /// This coordinator's agent id (selects its keypair).
    #[arg(long, default_value = "coordinator")]
    agent_id: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,swarm=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("swarm node starting");

    // Environment overrides take precedence over the CLI defaults; the
    // explicit flags win when both are present.
    let mut config = CoordinatorConfig::from_env(&args.agent_id);
    if args.state_dir != PathBuf::from(".state") {
        config.state_dir = args.state_dir;
    }
    if args.cas_dir != PathBuf::from(".cas") {
        config.cas_dir = args.cas_dir;
    }
    if args.log_dir != PathBuf::from("logs") {
        config.log_dir = args.log_dir;
    }
    if args.keys_dir != PathBuf::from(".keys") {
        config.keys_dir = args.keys_dir;
    }

    let transport = Arc::new(LocalTransport::default());
    let coordinator = Coordinator::open(&config, transport)
        .await
        .context("opening coordinator")?;

    info!(
        cas_is_ipfs = coordinator.cas_is_ipfs,
        register_replicated = coordinator.register_replicated,
        epoch = coordinator.epochs.current_epoch(),
        "components ready"
    );

    let _monitor = coordinator.spawn_lease_monitor();
    info!("lease monitor running");

    coordinator.run().await;

    coordinator.clock.flush().context("flushing lamport clock")?;
    Ok(())
}
