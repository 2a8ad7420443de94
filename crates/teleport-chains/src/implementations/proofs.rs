//! Digest-based stand-in for a zero-knowledge proof system.
//!
//! A proof is `keccak256(domain || circuit || public_inputs)`. It binds the
//! proof to its circuit and inputs but proves nothing beyond that, which is
//! enough to exercise proof-gated code paths locally.

use async_trait::async_trait;
use teleport_types::{circuits, keccak256, ProofError, ProofGenerator, ProofVerifier};

const DOMAIN: &[u8] = b"teleport/digest-proof/v1";

pub const PROOF_SYSTEM: &str = "digest-v1";

const KNOWN_CIRCUITS: &[&str] = &[
	circuits::TRANSFER,
	circuits::SOURCE_STATE,
	circuits::DEST_STATE,
	circuits::ASSET_VALIDITY,
	circuits::EXECUTION,
	circuits::VALIDATOR_ELIGIBILITY,
];

#[derive(Debug, Default, Clone)]
pub struct DigestProofSystem;

impl DigestProofSystem {
	pub fn new() -> Self {
		Self
	}

	fn digest(circuit: &str, public_inputs: &[u8]) -> Vec<u8> {
		let mut buf = Vec::with_capacity(DOMAIN.len() + circuit.len() + public_inputs.len() + 1);
		buf.extend_from_slice(DOMAIN);
		buf.extend_from_slice(circuit.as_bytes());
		buf.push(0);
		buf.extend_from_slice(public_inputs);
		keccak256(&buf).to_vec()
	}

	fn check_circuit(circuit: &str) -> Result<(), ProofError> {
		if KNOWN_CIRCUITS.contains(&circuit) {
			Ok(())
		} else {
			Err(ProofError::UnknownCircuit(circuit.to_string()))
		}
	}
}

#[async_trait]
impl ProofGenerator for DigestProofSystem {
	async fn generate_proof(
		&self,
		circuit: &str,
		public_inputs: &[u8],
	) -> Result<Vec<u8>, ProofError> {
		Self::check_circuit(circuit)?;
		Ok(Self::digest(circuit, public_inputs))
	}
}

#[async_trait]
impl ProofVerifier for DigestProofSystem {
	async fn verify_proof(
		&self,
		circuit: &str,
		proof: &[u8],
		public_inputs: &[u8],
	) -> Result<(), ProofError> {
		Self::check_circuit(circuit)?;
		if proof.is_empty() {
			return Err(ProofError::Invalid {
				circuit: circuit.to_string(),
				reason: "empty proof".into(),
			});
		}
		if proof != Self::digest(circuit, public_inputs).as_slice() {
			return Err(ProofError::Invalid {
				circuit: circuit.to_string(),
				reason: "digest mismatch".into(),
			});
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_proof_bound_to_circuit_and_inputs() {
		let system = DigestProofSystem::new();
		let proof = system
			.generate_proof(circuits::TRANSFER, b"inputs")
			.await
			.unwrap();

		system
			.verify_proof(circuits::TRANSFER, &proof, b"inputs")
			.await
			.unwrap();
		assert!(system
			.verify_proof(circuits::TRANSFER, &proof, b"other")
			.await
			.is_err());
		assert!(system
			.verify_proof(circuits::SOURCE_STATE, &proof, b"inputs")
			.await
			.is_err());
	}

	#[tokio::test]
	async fn test_unknown_circuit() {
		let system = DigestProofSystem::new();
		assert_eq!(
			system.generate_proof("nope", b"").await.unwrap_err(),
			ProofError::UnknownCircuit("nope".into())
		);
	}
}
