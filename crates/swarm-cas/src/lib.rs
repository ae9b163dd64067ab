//! Content-addressed artifact store.
//!
//! Blobs are keyed by SHA-256 hex and immutable once written. Two backends
//! share the `CasStore` trait: the filesystem store and an IPFS-backed
//! variant; `get_cas_store` selects one explicitly and tells the caller
//! which it got.

pub mod factory;
pub mod file;
pub mod ipfs;

pub use factory::get_cas_store;
pub use file::FileCas;
pub use ipfs::IpfsCas;

use async_trait::async_trait;
use serde_json::Value;
use swarm_core::types::Sha256Hex;
use swarm_core::SwarmError;
use swarm_crypto::canonical_json;

#[async_trait]
pub trait CasStore: Send + Sync {
    /// Store `data`, returning its SHA-256 hex. Storing existing content is
    /// a no-op that returns the hash.
    async fn put(&self, data: &[u8]) -> Result<Sha256Hex, SwarmError>;

    /// Fetch the blob for `hash`. Fails with `NotFound` for unknown hashes.
    async fn get(&self, hash: &str) -> Result<Vec<u8>, SwarmError>;

    /// True iff `hash` is stored.
    async fn has(&self, hash: &str) -> bool;

    /// Store the canonical JSON encoding of `value`.
    async fn put_json(&self, value: &Value) -> Result<Sha256Hex, SwarmError> {
        self.put(&canonical_json(value)).await
    }

    /// Fetch and decode a JSON blob.
    async fn get_json(&self, hash: &str) -> Result<Value, SwarmError> {
        let bytes = self.get(hash).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
