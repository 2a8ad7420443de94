//! Verification of proof bundles.

use teleport_types::{circuits, ProofContext, ProofError, ProofVerifier, TeleportProof};

/// Checks every required sub-proof, and the execution proof when present,
/// against the public inputs of `context`. Stops at the first failure.
pub async fn verify_bundle(
	verifier: &dyn ProofVerifier,
	proof: &TeleportProof,
	context: &ProofContext,
) -> Result<(), ProofError> {
	if let Some(circuit) = proof.missing_part() {
		return Err(ProofError::Invalid {
			circuit: circuit.to_string(),
			reason: "empty proof".into(),
		});
	}

	let inputs = context.public_inputs();
	for (circuit, bytes) in proof.required_parts() {
		verifier.verify_proof(circuit, bytes, &inputs).await?;
	}
	if let Some(execution) = &proof.execution_proof {
		verifier
			.verify_proof(circuits::EXECUTION, execution, &inputs)
			.await?;
	}
	Ok(())
}
