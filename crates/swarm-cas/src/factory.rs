use std::path::Path;
use std::sync::Arc;

use swarm_core::SwarmError;
use tracing::{info, warn};

use crate::{CasStore, FileCas, IpfsCas};

/// True iff the `IPFS_CAS` feature flag is set.
fn ipfs_requested() -> bool {
    matches!(
        std::env::var("IPFS_CAS").as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes")
    )
}

/// Select a content store.
///
/// Returns `(store, is_ipfs)` so callers can surface the mode in health
/// checks — a fallback to the filesystem is reported, never silent. The
/// daemon address comes from `IPFS_API` (default `http://127.0.0.1:5001`).
pub async fn get_cas_store<P: AsRef<Path>>(
    cas_dir: P,
) -> Result<(Arc<dyn CasStore>, bool), SwarmError> {
    let cas_dir = cas_dir.as_ref();
    if ipfs_requested() {
        let api =
            std::env::var("IPFS_API").unwrap_or_else(|_| "http://127.0.0.1:5001".to_string());
        match IpfsCas::connect(&api, cas_dir.join("ipfs-index")).await {
            Ok(store) => {
                info!("CAS backend: IPFS");
                return Ok((Arc::new(store), true));
            }
            Err(e) => {
                warn!(error = %e, "IPFS CAS unavailable, falling back to filesystem");
            }
        }
    }
    let store = FileCas::open(cas_dir)?;
    info!("CAS backend: filesystem");
    Ok((Arc::new(store), false))
}
