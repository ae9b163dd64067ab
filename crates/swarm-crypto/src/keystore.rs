use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use swarm_core::SwarmError;

use crate::keypair::KeyPair;

/// On-disk form of a persisted keypair: `<keys>/<agent_id>.json`.
#[derive(Serialize, Deserialize)]
struct StoredKey {
    agent_id: String,
    public_key_b64: String,
    secret_seed_b64: String,
}

/// Per-agent keypair store.
///
/// Each agent id owns one keypair file under the keys directory. The
/// process-wide env pair (`SWARM_SIGNING_SK_B64`) exists for legacy callers
/// only; new code passes an agent id.
pub struct Keystore {
    dir: PathBuf,
}

impl Keystore {
    /// Open a keystore rooted at `dir`, creating the directory if needed.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, SwarmError> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    /// Open the keystore at `SWARM_KEYS_DIR` (default `.keys`).
    pub fn open_default() -> Result<Self, SwarmError> {
        let dir = std::env::var("SWARM_KEYS_DIR").unwrap_or_else(|_| ".keys".into());
        Self::open(dir)
    }

    fn key_path(&self, agent_id: &str) -> PathBuf {
        // Agent ids are base64; '/' is the one path-hostile character.
        let safe = agent_id.replace('/', "_");
        self.dir.join(format!("{safe}.json"))
    }

    /// Load the keypair for `agent_id`, generating and persisting a fresh
    /// one on first use.
    pub fn load_or_create(&self, agent_id: &str) -> Result<KeyPair, SwarmError> {
        if let Some(kp) = self.load(agent_id)? {
            return Ok(kp);
        }
        let kp = KeyPair::generate();
        self.save(agent_id, &kp)?;
        Ok(kp)
    }

    /// Load the keypair for `agent_id` if one is persisted.
    pub fn load(&self, agent_id: &str) -> Result<Option<KeyPair>, SwarmError> {
        let path = self.key_path(agent_id);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        let stored: StoredKey = serde_json::from_str(&text)?;
        Ok(Some(KeyPair::from_seed_b64(&stored.secret_seed_b64)?))
    }

    fn save(&self, agent_id: &str, kp: &KeyPair) -> Result<(), SwarmError> {
        let stored = StoredKey {
            agent_id: agent_id.to_string(),
            public_key_b64: kp.public_key_b64(),
            secret_seed_b64: kp.secret_seed_b64(),
        };
        let text = serde_json::to_string_pretty(&stored)?;
        fs::write(self.key_path(agent_id), text)?;
        Ok(())
    }
}

/// Legacy process-wide signer seeded from `SWARM_SIGNING_SK_B64`.
pub fn load_env_signer() -> Result<KeyPair, SwarmError> {
    let seed = std::env::var("SWARM_SIGNING_SK_B64")
        .map_err(|_| SwarmError::MissingField("SWARM_SIGNING_SK_B64"))?;
    KeyPair::from_seed_b64(&seed)
}
