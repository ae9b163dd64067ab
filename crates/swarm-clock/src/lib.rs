//! Durable Lamport clock.
//!
//! One counter per process, persisted to `<state>/lamport.json` so restarts
//! never go backwards. `tick` and `observe` are totally ordered by the
//! internal mutex and persist before returning; `observe` in particular must
//! be durable before the observed message is acted on.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use swarm_core::types::Lamport;
use swarm_core::SwarmError;

#[derive(Serialize, Deserialize, Default)]
struct PersistedClock {
    counter: Lamport,
}

/// Process-wide logical clock. Clone-cheap via `Arc` at the call sites; the
/// struct itself owns the file and the lock.
pub struct LamportClock {
    path: PathBuf,
    inner: Mutex<Lamport>,
}

impl LamportClock {
    /// Open the clock backed by `path`, recovering the last persisted value
    /// (or 0 for a fresh state directory).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SwarmError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let counter = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str::<PersistedClock>(&text)
                .map(|p| p.counter)
                .unwrap_or(0),
            Err(_) => 0,
        };
        Ok(Self {
            path,
            inner: Mutex::new(counter),
        })
    }

    /// Open the clock at `SWARM_STATE_DIR/lamport.json` (default `.state`).
    pub fn open_default() -> Result<Self, SwarmError> {
        let dir = std::env::var("SWARM_STATE_DIR").unwrap_or_else(|_| ".state".into());
        Self::open(Path::new(&dir).join("lamport.json"))
    }

    /// Advance the clock by one and persist. Returns the new value.
    pub fn tick(&self) -> Result<Lamport, SwarmError> {
        let mut counter = self.inner.lock().expect("lamport lock poisoned");
        *counter += 1;
        self.persist(*counter)?;
        Ok(*counter)
    }

    /// Merge a remote timestamp: counter = max(counter, other) + 1,
    /// persisted synchronously.
    pub fn observe(&self, other: Lamport) -> Result<Lamport, SwarmError> {
        let mut counter = self.inner.lock().expect("lamport lock poisoned");
        *counter = (*counter).max(other) + 1;
        self.persist(*counter)?;
        Ok(*counter)
    }

    /// Current value without advancing.
    pub fn value(&self) -> Lamport {
        *self.inner.lock().expect("lamport lock poisoned")
    }

    /// Force the current value to disk. Called on shutdown.
    pub fn flush(&self) -> Result<(), SwarmError> {
        let counter = self.inner.lock().expect("lamport lock poisoned");
        self.persist(*counter)
    }

    fn persist(&self, value: Lamport) -> Result<(), SwarmError> {
        let text = serde_json::to_string(&PersistedClock { counter: value })?;
        fs::write(&self.path, text)?;
        Ok(())
    }
}
