use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::info;

use swarm_core::types::{Balance, TimestampNs};
use swarm_core::{now_ns, SwarmError};
use swarm_crypto::verify_pow;

/// Deployment-tunable knobs for identity creation. The defaults suit the
/// reference deployment; production networks override them.
#[derive(Clone, Debug)]
pub struct IdentityConfig {
    /// Minimum staked credits to mint a DID when a ledger is available.
    pub min_did_stake: Balance,
    /// DID creations allowed per account per hour.
    pub max_per_hour: usize,
    /// Proof-of-work difficulty (leading zero bits) for ledger-less mode.
    pub pow_difficulty: u8,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            min_did_stake: 100,
            max_per_hour: 5,
            pow_difficulty: 12,
        }
    }
}

const HOUR_NS: i64 = 3600 * 1_000_000_000;

/// Sybil-resistant `did:key` minting.
///
/// With a ledger, creating an identity costs skin in the game (staked
/// credits) and is rate-limited per account. Without one, the caller must
/// present proof-of-work over the account id.
pub struct DidManager {
    ledger: Option<Arc<crate::ledger::CreditLedger>>,
    config: IdentityConfig,
    recent: Mutex<HashMap<String, Vec<TimestampNs>>>,
}

impl DidManager {
    pub fn new(ledger: Option<Arc<crate::ledger::CreditLedger>>, config: IdentityConfig) -> Self {
        Self {
            ledger,
            config,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Mint a `did:key` for an Ed25519 public key, enforcing stake or PoW
    /// sybil resistance plus the per-account rate limit.
    pub fn create_did_key(
        &self,
        account_id: &str,
        public_key: &[u8; 32],
        pow_nonce: Option<u64>,
    ) -> Result<String, SwarmError> {
        self.check_rate_limit(account_id)?;

        match &self.ledger {
            Some(ledger) => {
                let locked = ledger
                    .get_account(account_id)?
                    .map(|a| a.locked)
                    .unwrap_or(0);
                if locked < self.config.min_did_stake {
                    return Err(SwarmError::DidStakeTooLow {
                        min: self.config.min_did_stake,
                    });
                }
            }
            None => {
                let nonce = pow_nonce.ok_or(SwarmError::DidPowInvalid)?;
                if !verify_pow(account_id.as_bytes(), nonce, self.config.pow_difficulty) {
                    return Err(SwarmError::DidPowInvalid);
                }
            }
        }

        self.record_creation(account_id);
        let did = did_key_from_public_key(public_key);
        info!(account_id, did = %did, "DID minted");
        Ok(did)
    }

    fn check_rate_limit(&self, account_id: &str) -> Result<(), SwarmError> {
        let recent = self.recent.lock().expect("did rate lock poisoned");
        let cutoff = now_ns() - HOUR_NS;
        let count = recent
            .get(account_id)
            .map(|ts| ts.iter().filter(|t| **t > cutoff).count())
            .unwrap_or(0);
        if count >= self.config.max_per_hour {
            return Err(SwarmError::RateLimitExceeded(format!(
                "{count} DID creations in the last hour (max {})",
                self.config.max_per_hour
            )));
        }
        Ok(())
    }

    fn record_creation(&self, account_id: &str) {
        let mut recent = self.recent.lock().expect("did rate lock poisoned");
        let cutoff = now_ns() - HOUR_NS;
        let entry = recent.entry(account_id.to_string()).or_default();
        entry.retain(|t| *t > cutoff);
        entry.push(now_ns());
    }
}

/// `did:key` encoding: multicodec ed25519-pub prefix (0xed 0x01) plus the
/// raw key, base58btc with the `z` multibase prefix.
pub fn did_key_from_public_key(public_key: &[u8; 32]) -> String {
    let mut multicodec = vec![0xed, 0x01];
    multicodec.extend_from_slice(public_key);
    format!("did:key:z{}", bs58::encode(multicodec).into_string())
}
