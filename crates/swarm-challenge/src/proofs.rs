use serde::{Deserialize, Serialize};
use std::str::FromStr;

use swarm_core::constants::{MAX_PROOF_GAS, MAX_PROOF_SIZE_BYTES};
use swarm_core::types::is_sha256_hex;
use swarm_core::SwarmError;

/// What a challenger claims went wrong with a committed result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProofType {
    SchemaViolation,
    MissingCitation,
    SemanticContradiction,
    OutputMismatch,
    PolicyBreach,
}

impl ProofType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProofType::SchemaViolation => "SCHEMA_VIOLATION",
            ProofType::MissingCitation => "MISSING_CITATION",
            ProofType::SemanticContradiction => "SEMANTIC_CONTRADICTION",
            ProofType::OutputMismatch => "OUTPUT_MISMATCH",
            ProofType::PolicyBreach => "POLICY_BREACH",
        }
    }
}

impl FromStr for ProofType {
    type Err = SwarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEMA_VIOLATION" => Ok(ProofType::SchemaViolation),
            "MISSING_CITATION" => Ok(ProofType::MissingCitation),
            "SEMANTIC_CONTRADICTION" => Ok(ProofType::SemanticContradiction),
            "OUTPUT_MISMATCH" => Ok(ProofType::OutputMismatch),
            "POLICY_BREACH" => Ok(ProofType::PolicyBreach),
            other => Err(SwarmError::InvalidProof(format!("unknown proof type: {other}"))),
        }
    }
}

/// Metadata for a challenge proof. The evidence itself lives in the CAS;
/// this carries its hash and the verification cost estimate.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProofSchema {
    pub proof_type: ProofType,
    pub evidence_hash: String,
    pub size_bytes: usize,
    pub gas_estimate: u64,
}

impl ProofSchema {
    /// Validate against the protocol limits.
    pub fn validate(&self) -> Result<(), SwarmError> {
        if self.size_bytes == 0 {
            return Err(SwarmError::InvalidProof("proof size must be positive".into()));
        }
        if self.size_bytes > MAX_PROOF_SIZE_BYTES {
            return Err(SwarmError::InvalidProof(format!(
                "proof size {} exceeds max {MAX_PROOF_SIZE_BYTES} bytes",
                self.size_bytes
            )));
        }
        if self.gas_estimate > MAX_PROOF_GAS {
            return Err(SwarmError::InvalidProof(format!(
                "gas estimate {} exceeds max {MAX_PROOF_GAS}",
                self.gas_estimate
            )));
        }
        if !is_sha256_hex(&self.evidence_hash) {
            return Err(SwarmError::InvalidProof(
                "evidence hash must be 64-character SHA-256 hex".into(),
            ));
        }
        Ok(())
    }
}
