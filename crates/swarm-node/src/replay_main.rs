//! swarm-replay — verify a thread from its audit log.
//!
//! Exit code 0 when every check passes, 1 otherwise.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use swarm_cas::FileCas;

#[derive(Parser, Debug)]
#[command(name = "swarm-replay", version, about = "Deterministic audit-log replay")]
struct Args {
    /// Thread to replay.
    thread_id: String,

    /// Path to the audit log (default: $SWARM_LOG_DIR/swarm.jsonl).
    #[arg(long)]
    log_path: Option<PathBuf>,

    /// CAS directory for COMMIT artifact checks (default: $SWARM_CAS_DIR
    /// or .cas).
    #[arg(long)]
    cas_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let log_path = args.log_path.unwrap_or_else(|| {
        let dir = std::env::var("SWARM_LOG_DIR").unwrap_or_else(|_| "logs".into());
        PathBuf::from(dir).join("swarm.jsonl")
    });
    let cas_dir = args.cas_dir.unwrap_or_else(|| {
        PathBuf::from(std::env::var("SWARM_CAS_DIR").unwrap_or_else(|_| ".cas".into()))
    });

    let cas = match FileCas::open(&cas_dir) {
        Ok(store) => Some(Arc::new(store) as Arc<dyn swarm_cas::CasStore>),
        Err(e) => {
            eprintln!("warning: CAS unavailable at {}: {e}", cas_dir.display());
            None
        }
    };

    match swarm_node::replay_thread(&log_path, &args.thread_id, cas).await {
        Ok(true) => {
            println!("replay OK: thread {}", args.thread_id);
            ExitCode::SUCCESS
        }
        Ok(false) => {
            eprintln!("replay FAILED: thread {}", args.thread_id);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("replay error: {e}");
            ExitCode::FAILURE
        }
    }
}
