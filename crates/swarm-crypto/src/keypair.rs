use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use swarm_core::types::AgentId;
use swarm_core::SwarmError;
use zeroize::Zeroize;

/// A swarm keypair: Ed25519 signing + verifying keys with the derived
/// agent id (base64 of the public key).
///
/// The secret seed is zeroized on drop.
#[derive(Serialize, Deserialize)]
pub struct KeyPair {
    pub agent_id: AgentId,
    pub public_key: [u8; 32],
    secret_seed: [u8; 32],
}

impl KeyPair {
    /// Generate a fresh Ed25519 keypair.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        let signing = SigningKey::generate(&mut csprng);
        Self::from_seed(signing.to_bytes())
    }

    /// Restore a keypair from a 32-byte secret seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(&seed);
        let public_key = signing.verifying_key().to_bytes();
        Self {
            agent_id: B64.encode(public_key),
            public_key,
            secret_seed: seed,
        }
    }

    /// Restore a keypair from a base64-encoded 32-byte seed (the
    /// `SWARM_SIGNING_SK_B64` wire form).
    pub fn from_seed_b64(seed_b64: &str) -> Result<Self, SwarmError> {
        let bytes = B64
            .decode(seed_b64)
            .map_err(|e| SwarmError::Serialization(format!("bad seed base64: {e}")))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SwarmError::Serialization("seed must be 32 bytes".into()))?;
        Ok(Self::from_seed(seed))
    }

    /// Sign `message` with this keypair's secret key.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let signing = SigningKey::from_bytes(&self.secret_seed);
        signing.sign(message).to_bytes()
    }

    /// Base64 of this keypair's public key (identical to the agent id).
    pub fn public_key_b64(&self) -> String {
        B64.encode(self.public_key)
    }

    /// Base64 of the secret seed, for persistence in the keystore.
    pub fn secret_seed_b64(&self) -> String {
        B64.encode(self.secret_seed)
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret_seed.zeroize();
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ agent_id: {}… }}", &self.agent_id[..8])
    }
}

/// Verify an Ed25519 signature over `message` with a raw 32-byte public key.
pub fn verify_signature(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    let Ok(vk) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let sig = Signature::from_bytes(signature);
    vk.verify(message, &sig).is_ok()
}

/// Verify with base64-encoded key and signature (the wire encoding).
pub fn verify_signature_b64(pk_b64: &str, message: &[u8], sig_b64: &str) -> bool {
    let Ok(pk_bytes) = B64.decode(pk_b64) else {
        return false;
    };
    let Ok(sig_bytes) = B64.decode(sig_b64) else {
        return false;
    };
    let (Ok(pk), Ok(sig)) = (
        <[u8; 32]>::try_from(pk_bytes.as_slice()),
        <[u8; 64]>::try_from(sig_bytes.as_slice()),
    ) else {
        return false;
    };
    verify_signature(&pk, message, &sig)
}
