use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use swarm_core::types::{is_sha256_hex, Sha256Hex};
use swarm_core::SwarmError;
use swarm_crypto::sha256_hex;
use tracing::debug;

use crate::CasStore;

/// Filesystem content store.
///
/// Layout: `<root>/sha256/<aa>/<bb>/<full-hex>` — two levels of prefix
/// sharding keep directories small. Writes stage to a temp file, fsync, then
/// rename into place, so a blob is either fully present or absent.
pub struct FileCas {
    root: PathBuf,
}

impl FileCas {
    /// Open (creating if needed) a file store rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, SwarmError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("sha256"))?;
        Ok(Self { root })
    }

    /// Open the store at `SWARM_CAS_DIR` (default `.cas`).
    pub fn open_default() -> Result<Self, SwarmError> {
        let dir = std::env::var("SWARM_CAS_DIR").unwrap_or_else(|_| ".cas".into());
        Self::open(dir)
    }

    fn object_path(&self, hash: &str) -> PathBuf {
        self.root
            .join("sha256")
            .join(&hash[0..2])
            .join(&hash[2..4])
            .join(hash)
    }
}

#[async_trait]
impl CasStore for FileCas {
    async fn put(&self, data: &[u8]) -> Result<Sha256Hex, SwarmError> {
        let hash = sha256_hex(data);
        let path = self.object_path(&hash);
        if path.exists() {
            return Ok(hash);
        }
        let parent = path
            .parent()
            .ok_or_else(|| SwarmError::Storage("object path has no parent".into()))?;
        fs::create_dir_all(parent)?;

        // Stage, fsync, rename — never expose a partial blob.
        let tmp = parent.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
        let mut f = fs::File::create(&tmp)?;
        f.write_all(data)?;
        f.sync_all()?;
        drop(f);
        fs::rename(&tmp, &path)?;

        debug!(%hash, bytes = data.len(), "stored blob");
        Ok(hash)
    }

    async fn get(&self, hash: &str) -> Result<Vec<u8>, SwarmError> {
        if !is_sha256_hex(hash) {
            return Err(SwarmError::NotFound(format!("malformed hash: {hash}")));
        }
        let path = self.object_path(hash);
        fs::read(&path).map_err(|_| SwarmError::NotFound(hash.to_string()))
    }

    async fn has(&self, hash: &str) -> bool {
        is_sha256_hex(hash) && self.object_path(hash).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_cas(name: &str) -> FileCas {
        let dir = std::env::temp_dir().join(format!("swarm_cas_test_{name}"));
        let _ = fs::remove_dir_all(&dir);
        FileCas::open(&dir).expect("open temp cas")
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let cas = temp_cas("round_trip");
        let hash = cas.put(b"artifact bytes").await.unwrap();
        assert_eq!(cas.get(&hash).await.unwrap(), b"artifact bytes");
        assert!(cas.has(&hash).await);
    }

    #[tokio::test]
    async fn put_is_idempotent() {
        let cas = temp_cas("idempotent");
        let a = cas.put(b"same").await.unwrap();
        let b = cas.put(b"same").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let cas = temp_cas("missing");
        let missing = "0".repeat(64);
        assert!(!cas.has(&missing).await);
        assert!(matches!(
            cas.get(&missing).await,
            Err(SwarmError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn put_json_is_canonical() {
        let cas = temp_cas("json");
        let h1 = cas.put_json(&json!({"b": 2, "a": 1})).await.unwrap();
        let h2 = cas.put_json(&json!({"a": 1, "b": 2})).await.unwrap();
        assert_eq!(h1, h2);
        assert_eq!(cas.get_json(&h1).await.unwrap(), json!({"a": 1, "b": 2}));
    }

    #[tokio::test]
    async fn paths_are_sharded() {
        let cas = temp_cas("sharded");
        let hash = cas.put(b"shard me").await.unwrap();
        let expected = cas
            .root
            .join("sha256")
            .join(&hash[0..2])
            .join(&hash[2..4])
            .join(&hash);
        assert!(expected.exists());
    }
}
