//! Append-only signed audit stream.
//!
//! Every bus publish, ingress delivery, DECIDE attempt, and slash writes
//! one JSONL line. Each line is independently verifiable and the file is
//! the sole input to deterministic replay.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use swarm_core::{now_ns, SwarmError};
use swarm_crypto::{canonical_json, sha256_hex, sign_record, verify_record, KeyPair};
use tracing::debug;

pub const DEFAULT_LOG_FILE: &str = "swarm.jsonl";

/// Signed JSONL event log.
pub struct AuditLog {
    path: PathBuf,
    keypair: Arc<KeyPair>,
    write_lock: Mutex<()>,
}

impl AuditLog {
    /// Open (creating parents as needed) the audit log at
    /// `<dir>/swarm.jsonl`.
    pub fn open<P: AsRef<Path>>(dir: P, keypair: Arc<KeyPair>) -> Result<Self, SwarmError> {
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            path: dir.as_ref().join(DEFAULT_LOG_FILE),
            keypair,
            write_lock: Mutex::new(()),
        })
    }

    /// Open at `SWARM_LOG_DIR` (default `logs`).
    pub fn open_default(keypair: Arc<KeyPair>) -> Result<Self, SwarmError> {
        let dir = std::env::var("SWARM_LOG_DIR").unwrap_or_else(|_| "logs".into());
        Self::open(dir, keypair)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sign and append one event line. The payload hash covers the
    /// canonical payload encoding so big payloads can later be replaced by
    /// their hash without invalidating the record shape.
    pub fn log_event(
        &self,
        thread_id: &str,
        subject: &str,
        kind: &str,
        payload: &Value,
    ) -> Result<(), SwarmError> {
        let record = json!({
            "ts_ns": now_ns(),
            "thread_id": thread_id,
            "subject": subject,
            "kind": kind,
            "payload_hash": sha256_hex(&canonical_json(payload)),
            "payload": payload,
            "version": 1,
        });
        let signed = sign_record(&self.keypair, &record);
        let line = serde_json::to_string(&signed)?;

        let _guard = self.write_lock.lock().expect("audit lock poisoned");
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")?;
        debug!(thread_id, kind, "audit line written");
        Ok(())
    }

    /// Read every record in a JSONL audit file, in file order.
    pub fn read_log<P: AsRef<Path>>(path: P) -> Result<Vec<Value>, SwarmError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|_| SwarmError::NotFound(path.as_ref().display().to_string()))?;
        let mut out = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            out.push(serde_json::from_str(line)?);
        }
        Ok(out)
    }

    /// Verify one record's signature.
    pub fn verify_line(record: &Value) -> bool {
        verify_record(record)
    }
}
