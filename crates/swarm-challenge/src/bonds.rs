use serde::{Deserialize, Serialize};
use std::str::FromStr;

use swarm_core::types::Balance;
use swarm_core::SwarmError;

use crate::proofs::ProofType;

/// Complexity multiplier for bond sizing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplexityLevel {
    Simple,
    Moderate,
    Complex,
}

impl ComplexityLevel {
    pub fn multiplier(&self) -> Balance {
        match self {
            ComplexityLevel::Simple => 1,
            ComplexityLevel::Moderate => 2,
            ComplexityLevel::Complex => 5,
        }
    }
}

impl FromStr for ComplexityLevel {
    type Err = SwarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SIMPLE" => Ok(ComplexityLevel::Simple),
            "MODERATE" => Ok(ComplexityLevel::Moderate),
            "COMPLEX" => Ok(ComplexityLevel::Complex),
            other => Err(SwarmError::InvalidProof(format!(
                "unknown complexity level: {other}"
            ))),
        }
    }
}

/// Base bond per proof type. Cheap claims post small bonds; claims that
/// take real verification effort cost more to raise.
fn base_bond(proof_type: ProofType) -> Balance {
    match proof_type {
        ProofType::SchemaViolation => 10,
        ProofType::MissingCitation => 25,
        ProofType::SemanticContradiction => 50,
        ProofType::PolicyBreach => 75,
        ProofType::OutputMismatch => 100,
    }
}

/// Required bond: base[proof_type] × complexity multiplier.
pub fn bond_for(proof_type: ProofType, complexity: ComplexityLevel) -> Balance {
    base_bond(proof_type) * complexity.multiplier()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_amounts_match_protocol() {
        assert_eq!(bond_for(ProofType::SchemaViolation, ComplexityLevel::Simple), 10);
        assert_eq!(bond_for(ProofType::MissingCitation, ComplexityLevel::Simple), 25);
        assert_eq!(bond_for(ProofType::SemanticContradiction, ComplexityLevel::Simple), 50);
        assert_eq!(bond_for(ProofType::PolicyBreach, ComplexityLevel::Simple), 75);
        assert_eq!(bond_for(ProofType::OutputMismatch, ComplexityLevel::Simple), 100);
    }

    #[test]
    fn multipliers_scale_bonds() {
        assert_eq!(bond_for(ProofType::SchemaViolation, ComplexityLevel::Moderate), 20);
        assert_eq!(bond_for(ProofType::OutputMismatch, ComplexityLevel::Complex), 500);
    }

    #[test]
    fn complexity_parses_from_wire() {
        assert_eq!("SIMPLE".parse::<ComplexityLevel>().unwrap(), ComplexityLevel::Simple);
        assert!("EXTREME".parse::<ComplexityLevel>().is_err());
    }
}
