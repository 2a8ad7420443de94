//! Threshold Schnorr signing with per-signer binding factors.
//!
//! Round 1 collects hiding and binding nonce commitments from the key's
//! participants and fixes the signer set to the `threshold` lowest indices
//! that answered. Round 2 broadcasts partial signatures. Round 3 verifies
//! every partial against the signer's verification share and combines them.

use crate::crypto::{challenge, hash_to_scalar, lagrange_at_zero, random_scalar, verify, Signature};
use crate::error::ThresholdError;
use crate::keys::{GroupPublicKey, KeyShare};
use crate::rounds::RoundContext;
use crate::transport::Payload;
use curve25519_dalek::{ristretto::RistrettoPoint, scalar::Scalar, traits::Identity};
use std::collections::{BTreeMap, HashMap};
use teleport_types::NodeId;
use tracing::debug;

pub(crate) const ROUND_NONCE: u8 = 1;
pub(crate) const ROUND_PARTIAL: u8 = 2;
pub(crate) const ROUND_COMBINE: u8 = 3;

#[derive(Clone, Copy)]
struct NonceCommitment {
	node: NodeId,
	hiding: RistrettoPoint,
	binding: RistrettoPoint,
}

/// Inputs of a signing session.
pub(crate) struct SignPlan {
	pub key: GroupPublicKey,
	/// This process's shares of the key's current epoch.
	pub shares: Vec<KeyShare>,
	pub message_hash: [u8; 32],
}

/// State after the nonce round.
pub(crate) struct NoncesCommitted {
	plan: SignPlan,
	nonces: HashMap<NodeId, (Scalar, Scalar)>,
	/// Chosen signers keyed by share index.
	signers: BTreeMap<u32, NonceCommitment>,
}

/// State after the partial round.
pub(crate) struct PartialsSent {
	plan: SignPlan,
	signers: BTreeMap<u32, NonceCommitment>,
	binding: HashMap<u32, Scalar>,
	group_nonce: RistrettoPoint,
	challenge: Scalar,
}

/// Combined signature and the nodes that produced it.
pub(crate) struct SignOutput {
	pub signature: Signature,
	pub signers: Vec<NodeId>,
}

fn encode_commitments(signers: &BTreeMap<u32, NonceCommitment>) -> Vec<u8> {
	let mut out = Vec::with_capacity(signers.len() * 68);
	for (index, c) in signers {
		out.extend_from_slice(&index.to_be_bytes());
		out.extend_from_slice(c.hiding.compress().as_bytes());
		out.extend_from_slice(c.binding.compress().as_bytes());
	}
	out
}

fn binding_factors(
	signers: &BTreeMap<u32, NonceCommitment>,
	message_hash: &[u8; 32],
) -> HashMap<u32, Scalar> {
	let encoded = encode_commitments(signers);
	signers
		.keys()
		.map(|index| {
			let rho = hash_to_scalar(
				b"teleport/binding",
				&[&index.to_be_bytes(), message_hash, &encoded],
			);
			(*index, rho)
		})
		.collect()
}

/// Round 1. Fails if fewer than `threshold` participants commit before the deadline.
pub(crate) async fn commit_nonces(
	ctx: &RoundContext,
	plan: SignPlan,
) -> Result<NoncesCommitted, ThresholdError> {
	let Some(first) = plan.shares.first().map(|s| s.node_id) else {
		return Err(ctx.fail(ROUND_NONCE, "no local share"));
	};

	let mut nonces = HashMap::new();
	for share in &plan.shares {
		let (d, e) = (random_scalar(), random_scalar());
		ctx.broadcast(
			ROUND_NONCE,
			share.node_id,
			Payload::SignNonce {
				hiding: RistrettoPoint::mul_base(&d),
				binding: RistrettoPoint::mul_base(&e),
			},
		)
		.await?;
		nonces.insert(share.node_id, (d, e));
	}

	let collected = ctx.collect(ROUND_NONCE, first, &plan.key.participants).await?;
	let mut responders = BTreeMap::new();
	for (node, payload) in collected.messages {
		let Payload::SignNonce { hiding, binding } = payload else {
			continue;
		};
		if let Some(index) = plan.key.index_of(&node) {
			responders.insert(
				index,
				NonceCommitment {
					node,
					hiding,
					binding,
				},
			);
		}
	}

	let need = plan.key.threshold;
	if responders.len() < need {
		return Err(ctx.fail(
			ROUND_NONCE,
			format!(
				"insufficient nonce commitments: have {}, need {}",
				responders.len(),
				need
			),
		));
	}
	let signers: BTreeMap<u32, NonceCommitment> = responders.into_iter().take(need).collect();

	debug!(session_id = %ctx.session_id, signers = signers.len(), "Nonce round complete");
	Ok(NoncesCommitted {
		plan,
		nonces,
		signers,
	})
}

/// Round 2. Local signers in the chosen set broadcast their partial signature.
pub(crate) async fn send_partials(
	ctx: &RoundContext,
	state: NoncesCommitted,
) -> Result<PartialsSent, ThresholdError> {
	let NoncesCommitted {
		plan,
		nonces,
		signers,
	} = state;

	let binding = binding_factors(&signers, &plan.message_hash);
	let group_nonce = signers
		.iter()
		.fold(RistrettoPoint::identity(), |acc, (index, c)| {
			let rho = binding.get(index).copied().unwrap_or(Scalar::ZERO);
			acc + c.hiding + c.binding * rho
		});
	let c = challenge(&group_nonce, &plan.key.public_key, &plan.message_hash);
	let indices: Vec<u32> = signers.keys().copied().collect();

	for share in &plan.shares {
		if !signers.contains_key(&share.index) {
			continue;
		}
		let (Some((d, e)), Some(rho)) = (nonces.get(&share.node_id), binding.get(&share.index))
		else {
			return Err(ctx.fail(ROUND_PARTIAL, "missing local nonce"));
		};
		let lambda = lagrange_at_zero(share.index, &indices);
		let z = d + e * rho + lambda * share.secret * c;
		ctx.broadcast(ROUND_PARTIAL, share.node_id, Payload::SignPartial { z })
			.await?;
	}

	Ok(PartialsSent {
		plan,
		signers,
		binding,
		group_nonce,
		challenge: c,
	})
}

/// Round 3. Verifies each partial and combines them into the group signature.
pub(crate) async fn combine(ctx: &RoundContext, state: PartialsSent) -> Result<SignOutput, ThresholdError> {
	let PartialsSent {
		plan,
		signers,
		binding,
		group_nonce,
		challenge: c,
	} = state;

	let Some(recipient) = plan.shares.first().map(|s| s.node_id) else {
		return Err(ctx.fail(ROUND_COMBINE, "no local share"));
	};
	let expected: Vec<NodeId> = signers.values().map(|s| s.node).collect();
	let indices: Vec<u32> = signers.keys().copied().collect();
	let collected = ctx.collect(ROUND_PARTIAL, recipient, &expected).await?;

	let mut z = Scalar::ZERO;
	let mut valid = 0usize;
	for (index, commitment) in &signers {
		let Some(Payload::SignPartial { z: partial }) = collected.messages.get(&commitment.node)
		else {
			continue;
		};
		let (Some(rho), Some(y_i)) = (binding.get(index), plan.key.verification_share(*index))
		else {
			continue;
		};
		let lambda = lagrange_at_zero(*index, &indices);
		let expected_point = commitment.hiding + commitment.binding * rho + y_i * (c * lambda);
		if RistrettoPoint::mul_base(partial) == expected_point {
			z += partial;
			valid += 1;
		} else {
			debug!(
				session_id = %ctx.session_id,
				signer = ?commitment.node,
				"Rejected invalid partial signature"
			);
		}
	}

	let need = plan.key.threshold;
	if valid < need {
		return Err(ctx.fail(
			ROUND_COMBINE,
			format!("insufficient valid partial signatures: have {}, need {}", valid, need),
		));
	}

	let signature = Signature {
		r: group_nonce,
		z,
	};
	if !verify(&plan.key.public_key, &plan.message_hash, &signature) {
		return Err(ctx.fail(ROUND_COMBINE, "combined signature does not verify"));
	}
	Ok(SignOutput {
		signature,
		signers: expected,
	})
}
