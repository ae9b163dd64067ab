use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use swarm_core::constants::{CAS_BREAKER_COOLDOWN_SECS, CAS_BREAKER_THRESHOLD, CAS_TIMEOUT_SECS};
use swarm_core::types::Sha256Hex;
use swarm_core::SwarmError;
use swarm_crypto::sha256_hex;
use tracing::{info, warn};

use crate::CasStore;

/// Circuit breaker over the IPFS daemon: opens after
/// `CAS_BREAKER_THRESHOLD` consecutive timeouts and stays open for
/// `CAS_BREAKER_COOLDOWN_SECS`.
struct Breaker {
    consecutive_timeouts: u32,
    open_until: Option<Instant>,
}

impl Breaker {
    fn new() -> Self {
        Self {
            consecutive_timeouts: 0,
            open_until: None,
        }
    }

    fn is_open(&mut self) -> bool {
        match self.open_until {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                // Cooldown elapsed; allow a probe.
                self.open_until = None;
                self.consecutive_timeouts = 0;
                false
            }
            None => false,
        }
    }

    fn record_timeout(&mut self) {
        self.consecutive_timeouts += 1;
        if self.consecutive_timeouts >= CAS_BREAKER_THRESHOLD {
            self.open_until =
                Some(Instant::now() + Duration::from_secs(CAS_BREAKER_COOLDOWN_SECS));
            warn!(
                timeouts = self.consecutive_timeouts,
                cooldown_secs = CAS_BREAKER_COOLDOWN_SECS,
                "IPFS circuit breaker opened"
            );
        }
    }

    fn record_success(&mut self) {
        self.consecutive_timeouts = 0;
    }
}

/// IPFS-backed content store with the same semantics as `FileCas`: SHA-256
/// hex keys, immutable content, idempotent put.
///
/// Blobs live in the IPFS daemon; a local sled index maps our SHA-256 key to
/// the daemon's CID. Reads are bounded by `CAS_TIMEOUT_SECS` and guarded by
/// the circuit breaker.
pub struct IpfsCas {
    client: reqwest::Client,
    api_base: String,
    index: sled::Tree,
    _db: sled::Db,
    breaker: Mutex<Breaker>,
}

impl IpfsCas {
    /// Connect to an IPFS daemon API (e.g. `http://127.0.0.1:5001`) and open
    /// the local hash→CID index under `index_dir`. Fails fast if the daemon
    /// does not answer a version probe.
    pub async fn connect<P: AsRef<Path>>(api_base: &str, index_dir: P) -> Result<Self, SwarmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(CAS_TIMEOUT_SECS))
            .build()
            .map_err(|e| SwarmError::Io(e.to_string()))?;

        let resp = client
            .post(format!("{api_base}/api/v0/version"))
            .send()
            .await
            .map_err(|e| SwarmError::Timeout(format!("IPFS version probe: {e}")))?;
        if !resp.status().is_success() {
            return Err(SwarmError::Io(format!(
                "IPFS version probe returned {}",
                resp.status()
            )));
        }

        let db = sled::open(index_dir.as_ref()).map_err(|e| SwarmError::Storage(e.to_string()))?;
        let index = db
            .open_tree("ipfs_index")
            .map_err(|e| SwarmError::Storage(e.to_string()))?;

        info!(api = api_base, "connected to IPFS daemon");
        Ok(Self {
            client,
            api_base: api_base.to_string(),
            index,
            _db: db,
            breaker: Mutex::new(Breaker::new()),
        })
    }

    fn check_breaker(&self) -> Result<(), SwarmError> {
        let mut breaker = self.breaker.lock().expect("breaker lock poisoned");
        if breaker.is_open() {
            return Err(SwarmError::Timeout("IPFS circuit breaker open".into()));
        }
        Ok(())
    }

    fn note_result(&self, timed_out: bool) {
        let mut breaker = self.breaker.lock().expect("breaker lock poisoned");
        if timed_out {
            breaker.record_timeout();
        } else {
            breaker.record_success();
        }
    }

    fn cid_for(&self, hash: &str) -> Option<String> {
        self.index
            .get(hash.as_bytes())
            .ok()
            .flatten()
            .map(|v| String::from_utf8_lossy(&v).into_owned())
    }
}

#[derive(serde::Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[async_trait]
impl CasStore for IpfsCas {
    async fn put(&self, data: &[u8]) -> Result<Sha256Hex, SwarmError> {
        let hash = sha256_hex(data);
        if self.cid_for(&hash).is_some() {
            return Ok(hash);
        }
        self.check_breaker()?;

        let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name("blob");
        let form = reqwest::multipart::Form::new().part("file", part);
        let result = self
            .client
            .post(format!("{}/api/v0/add?pin=true", self.api_base))
            .multipart(form)
            .send()
            .await;

        match result {
            Ok(resp) => {
                self.note_result(false);
                let added: AddResponse = resp
                    .json()
                    .await
                    .map_err(|e| SwarmError::Serialization(e.to_string()))?;
                self.index
                    .insert(hash.as_bytes(), added.hash.as_bytes())
                    .map_err(|e| SwarmError::Storage(e.to_string()))?;
                Ok(hash)
            }
            Err(e) if e.is_timeout() => {
                self.note_result(true);
                Err(SwarmError::Timeout(format!("IPFS add: {e}")))
            }
            Err(e) => Err(SwarmError::Io(format!("IPFS add: {e}"))),
        }
    }

    async fn get(&self, hash: &str) -> Result<Vec<u8>, SwarmError> {
        let cid = self
            .cid_for(hash)
            .ok_or_else(|| SwarmError::NotFound(hash.to_string()))?;
        self.check_breaker()?;

        let result = self
            .client
            .post(format!("{}/api/v0/cat?arg={cid}", self.api_base))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                self.note_result(false);
                let bytes = resp
                    .bytes()
                    .await
                    .map_err(|e| SwarmError::Io(e.to_string()))?;
                Ok(bytes.to_vec())
            }
            Ok(resp) => {
                self.note_result(false);
                Err(SwarmError::NotFound(format!(
                    "IPFS cat {cid}: {}",
                    resp.status()
                )))
            }
            Err(e) if e.is_timeout() => {
                self.note_result(true);
                Err(SwarmError::Timeout(format!("IPFS cat: {e}")))
            }
            Err(e) => Err(SwarmError::Io(format!("IPFS cat: {e}"))),
        }
    }

    async fn has(&self, hash: &str) -> bool {
        self.cid_for(hash).is_some()
    }
}
