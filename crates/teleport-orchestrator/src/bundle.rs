//! Proof bundle generation for settlement legs.

use chrono::Utc;
use teleport_types::{
	circuits, Id, NodeId, ProofContext, ProofError, ProofGenerator, TeleportProof,
};

/// Produces every required sub-proof of a bundle over `context`.
pub async fn generate_bundle(
	generator: &dyn ProofGenerator,
	proof_system: &str,
	context: &ProofContext,
) -> Result<TeleportProof, ProofError> {
	let inputs = context.public_inputs();
	let transfer_proof = generator.generate_proof(circuits::TRANSFER, &inputs).await?;
	let source_state_proof = generator
		.generate_proof(circuits::SOURCE_STATE, &inputs)
		.await?;
	let dest_state_proof = generator.generate_proof(circuits::DEST_STATE, &inputs).await?;
	let asset_validity_proof = generator
		.generate_proof(circuits::ASSET_VALIDITY, &inputs)
		.await?;

	Ok(TeleportProof {
		transfer_proof,
		source_state_proof,
		dest_state_proof,
		asset_validity_proof,
		execution_proof: None,
		validator_signatures: Vec::new(),
		proof_system: proof_system.to_string(),
		generated_at: Utc::now(),
	})
}

/// Public inputs of a validator-eligibility proof.
pub fn eligibility_inputs(
	nft_asset_id: &Id,
	node_id: &NodeId,
	stake_amount: u64,
	staking_height: u64,
) -> Vec<u8> {
	let mut buf = Vec::with_capacity(32 + 20 + 16);
	buf.extend_from_slice(nft_asset_id.as_bytes());
	buf.extend_from_slice(node_id.as_bytes());
	buf.extend_from_slice(&stake_amount.to_be_bytes());
	buf.extend_from_slice(&staking_height.to_be_bytes());
	buf
}
