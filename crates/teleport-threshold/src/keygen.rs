//! Joint Feldman key generation and resharing.
//!
//! Key generation, reshare and refresh are one protocol with different
//! dealers. Each dealer shares a secret with a degree `threshold - 1`
//! polynomial; receivers sum what they get. For a fresh key every participant
//! deals a random secret. For a reshare the old participants deal their
//! Lagrange-weighted shares, so the sum of the dealt secrets, and therefore
//! the group key, stays the same.
//!
//! 1. Commit: every member broadcasts an ephemeral key, and dealers also a
//!    hash of their coefficient commitments.
//! 2. Share: dealers send each receiver its share, masked with a pad derived
//!    from both ephemeral keys, together with the revealed commitments.
//! 3. Verify & combine: receivers check the commitments against round 1 and
//!    the share against the commitments, then persist their combined share.

use crate::crypto::{
	commitment_hash, evaluate_commitments, hash_to_scalar, lagrange_at_zero, random_scalar,
	Polynomial,
};
use crate::error::ThresholdError;
use crate::keys::{GroupPublicKey, KeyShare, KeyStore};
use crate::rounds::{index_in, RoundContext};
use crate::transport::Payload;
use chrono::Utc;
use curve25519_dalek::{ristretto::RistrettoPoint, scalar::Scalar, traits::Identity};
use std::collections::HashMap;
use teleport_types::{Id, NodeId, SessionId};
use tracing::debug;

pub(crate) const ROUND_COMMIT: u8 = 1;
pub(crate) const ROUND_SHARE: u8 = 2;
pub(crate) const ROUND_COMBINE: u8 = 3;

/// Key being reshared.
pub(crate) struct PreviousKey {
	pub key: GroupPublicKey,
	/// `lambda_i * Y_i` per dealer: the constant term each dealer must commit to.
	pub dealer_commitments: HashMap<NodeId, RistrettoPoint>,
}

/// Who deals, who receives, and what the local dealers share out.
pub(crate) struct DealPlan {
	pub key_id: Id,
	pub epoch: u32,
	pub dealers: Vec<NodeId>,
	pub receivers: Vec<NodeId>,
	pub threshold: usize,
	secrets: HashMap<NodeId, Scalar>,
	previous: Option<PreviousKey>,
}

impl DealPlan {
	/// Fresh key: every participant deals a random secret.
	pub fn fresh(key_id: Id, participants: Vec<NodeId>, threshold: usize, local: &[NodeId]) -> Self {
		let secrets = participants
			.iter()
			.filter(|p| local.contains(p))
			.map(|p| (*p, random_scalar()))
			.collect();
		Self {
			key_id,
			epoch: 0,
			dealers: participants.clone(),
			receivers: participants,
			threshold,
			secrets,
			previous: None,
		}
	}

	/// Reshare of `current` to `receivers`. `local_shares` are this process's
	/// shares of the current epoch.
	pub fn reshare(
		current: GroupPublicKey,
		local_shares: &[KeyShare],
		receivers: Vec<NodeId>,
		threshold: usize,
	) -> Result<Self, ThresholdError> {
		let indices: Vec<u32> = (1..=current.participants.len() as u32).collect();
		let mut dealer_commitments = HashMap::new();
		for (pos, node) in current.participants.iter().enumerate() {
			let index = pos as u32 + 1;
			let share = current.verification_share(index).ok_or_else(|| {
				ThresholdError::InvalidRequest(format!(
					"key {} lacks a verification share for index {}",
					current.key_id, index
				))
			})?;
			dealer_commitments.insert(*node, lagrange_at_zero(index, &indices) * share);
		}

		let secrets = local_shares
			.iter()
			.map(|s| (s.node_id, lagrange_at_zero(s.index, &indices) * s.secret))
			.collect();

		Ok(Self {
			key_id: current.key_id,
			epoch: current.epoch + 1,
			dealers: current.participants.clone(),
			receivers,
			threshold,
			secrets,
			previous: Some(PreviousKey {
				key: current,
				dealer_commitments,
			}),
		})
	}

	/// Dealers followed by receivers that do not also deal.
	pub fn members(&self) -> Vec<NodeId> {
		let mut members = self.dealers.clone();
		for r in &self.receivers {
			if !members.contains(r) {
				members.push(*r);
			}
		}
		members
	}
}

struct MemberCommit {
	commitment: Option<[u8; 32]>,
	ephemeral_key: RistrettoPoint,
}

/// State after the commit round.
pub(crate) struct Committed {
	plan: DealPlan,
	polynomials: HashMap<NodeId, Polynomial>,
	ephemeral: HashMap<NodeId, Scalar>,
	commits: HashMap<NodeId, MemberCommit>,
}

/// State after the share round.
pub(crate) struct Dealt {
	plan: DealPlan,
	ephemeral: HashMap<NodeId, Scalar>,
	commits: HashMap<NodeId, MemberCommit>,
}

fn share_pad(session_id: &SessionId, shared: &RistrettoPoint, from: &NodeId, to: &NodeId) -> Scalar {
	hash_to_scalar(
		b"teleport/share-pad",
		&[
			session_id.as_bytes(),
			shared.compress().as_bytes(),
			from.as_bytes(),
			to.as_bytes(),
		],
	)
}

/// Round 1. Fails unless every member commits before the round deadline.
pub(crate) async fn commit(ctx: &RoundContext, plan: DealPlan) -> Result<Committed, ThresholdError> {
	let members = plan.members();
	let local_members = ctx.local_in(&members);
	let Some(&first) = local_members.first() else {
		return Err(ctx.fail(ROUND_COMMIT, "no local member"));
	};

	let mut polynomials = HashMap::new();
	let mut ephemeral = HashMap::new();
	for node in &local_members {
		let e = random_scalar();
		let commitment = match plan.secrets.get(node) {
			Some(secret) => {
				let poly = Polynomial::random(*secret, plan.threshold);
				let hash = commitment_hash(&poly.commitments());
				polynomials.insert(*node, poly);
				Some(hash)
			},
			None => None,
		};
		ctx.broadcast(
			ROUND_COMMIT,
			*node,
			Payload::KeyGenCommit {
				commitment,
				ephemeral_key: RistrettoPoint::mul_base(&e),
			},
		)
		.await?;
		ephemeral.insert(*node, e);
	}

	let collected = ctx.collect_all(ROUND_COMMIT, first, &members).await?;
	let mut commits = HashMap::new();
	for (node, payload) in collected.messages {
		let Payload::KeyGenCommit {
			commitment,
			ephemeral_key,
		} = payload
		else {
			return Err(ctx.fail(ROUND_COMMIT, format!("unexpected message from {:?}", node)));
		};
		if plan.dealers.contains(&node) && commitment.is_none() {
			return Err(ctx.fail(ROUND_COMMIT, format!("dealer {:?} sent no commitment", node)));
		}
		commits.insert(
			node,
			MemberCommit {
				commitment,
				ephemeral_key,
			},
		);
	}

	debug!(session_id = %ctx.session_id, members = members.len(), "Commit round complete");
	Ok(Committed {
		plan,
		polynomials,
		ephemeral,
		commits,
	})
}

/// Round 2. Sends every receiver its masked share from each local dealer.
pub(crate) async fn deal(ctx: &RoundContext, committed: Committed) -> Result<Dealt, ThresholdError> {
	let Committed {
		plan,
		polynomials,
		ephemeral,
		commits,
	} = committed;

	for (dealer, poly) in &polynomials {
		let commitments = poly.commitments();
		let e = ephemeral
			.get(dealer)
			.ok_or_else(|| ctx.fail(ROUND_SHARE, "missing ephemeral secret"))?;
		for (pos, receiver) in plan.receivers.iter().enumerate() {
			let peer = commits
				.get(receiver)
				.ok_or_else(|| ctx.fail(ROUND_SHARE, format!("no commit from {:?}", receiver)))?;
			let pad = share_pad(&ctx.session_id, &(e * peer.ephemeral_key), dealer, receiver);
			let share = poly.evaluate(pos as u32 + 1);
			ctx.send(
				ROUND_SHARE,
				*dealer,
				Some(*receiver),
				Payload::KeyGenShare {
					encrypted_share: share + pad,
					commitments: commitments.clone(),
				},
			)
			.await?;
		}
	}

	Ok(Dealt {
		plan,
		ephemeral,
		commits,
	})
}

/// Round 3. Verifies received shares and persists the result for every
/// local receiver. Nothing is persisted unless all local checks pass.
pub(crate) async fn combine(ctx: &RoundContext, dealt: Dealt) -> Result<GroupPublicKey, ThresholdError> {
	let Dealt {
		plan,
		ephemeral,
		commits,
	} = dealt;

	let local_receivers = ctx.local_in(&plan.receivers);
	if local_receivers.is_empty() {
		// Only dealing for this process; the key itself does not change.
		return match plan.previous {
			Some(previous) => Ok(previous.key),
			None => Err(ctx.fail(ROUND_COMBINE, "no local receiver")),
		};
	}

	let mut dealer_commitments: HashMap<NodeId, Vec<RistrettoPoint>> = HashMap::new();
	let mut secrets = Vec::with_capacity(local_receivers.len());

	for receiver in &local_receivers {
		let index = index_in(&plan.receivers, receiver)
			.ok_or_else(|| ctx.fail(ROUND_COMBINE, "receiver index"))?;
		let e = ephemeral
			.get(receiver)
			.ok_or_else(|| ctx.fail(ROUND_COMBINE, "missing ephemeral secret"))?;
		let collected = ctx.collect_all(ROUND_SHARE, *receiver, &plan.dealers).await?;

		let mut secret = Scalar::ZERO;
		for dealer in &plan.dealers {
			let Some(Payload::KeyGenShare {
				encrypted_share,
				commitments,
			}) = collected.messages.get(dealer)
			else {
				return Err(ctx.fail(ROUND_COMBINE, format!("no share from {:?}", dealer)));
			};

			if commitments.len() != plan.threshold {
				return Err(ctx.fail(
					ROUND_COMBINE,
					format!(
						"dealer {:?} committed to {} coefficients, expected {}",
						dealer,
						commitments.len(),
						plan.threshold
					),
				));
			}
			let announced = commits.get(dealer).and_then(|c| c.commitment);
			if announced != Some(commitment_hash(commitments)) {
				return Err(ctx.fail(
					ROUND_COMBINE,
					format!("commitments of {:?} do not match round 1", dealer),
				));
			}
			if let Some(previous) = &plan.previous {
				if previous.dealer_commitments.get(dealer) != commitments.first() {
					return Err(ctx.fail(
						ROUND_COMBINE,
						format!("dealer {:?} did not reshare its own share", dealer),
					));
				}
			}

			let peer = commits
				.get(dealer)
				.ok_or_else(|| ctx.fail(ROUND_COMBINE, "missing dealer commit"))?;
			let pad = share_pad(&ctx.session_id, &(e * peer.ephemeral_key), dealer, receiver);
			let share = encrypted_share - pad;
			if RistrettoPoint::mul_base(&share) != evaluate_commitments(commitments, index) {
				return Err(ctx.fail(
					ROUND_COMBINE,
					format!("share from {:?} fails verification", dealer),
				));
			}

			secret += share;
			dealer_commitments
				.entry(*dealer)
				.or_insert_with(|| commitments.clone());
		}
		secrets.push((*receiver, index, secret));
	}

	let public_key = dealer_commitments
		.values()
		.filter_map(|c| c.first())
		.fold(RistrettoPoint::identity(), |acc, c| acc + c);
	let verification_shares: Vec<RistrettoPoint> = (1..=plan.receivers.len() as u32)
		.map(|k| {
			dealer_commitments
				.values()
				.fold(RistrettoPoint::identity(), |acc, c| acc + evaluate_commitments(c, k))
		})
		.collect();

	if let Some(previous) = &plan.previous {
		if previous.key.public_key != public_key {
			return Err(ctx.fail(ROUND_COMBINE, "resharing changed the group public key"));
		}
	}
	for (node, index, secret) in &secrets {
		if verification_shares.get(*index as usize - 1) != Some(&RistrettoPoint::mul_base(secret)) {
			return Err(ctx.fail(
				ROUND_COMBINE,
				format!("combined share of {:?} is inconsistent", node),
			));
		}
	}

	let store = KeyStore::new(&ctx.storage);
	for (node, index, secret) in secrets {
		store
			.save_share(&KeyShare {
				key_id: plan.key_id,
				epoch: plan.epoch,
				node_id: node,
				index,
				secret,
				threshold: plan.threshold,
				total: plan.receivers.len(),
			})
			.await?;
	}
	let group_key = GroupPublicKey {
		key_id: plan.key_id,
		epoch: plan.epoch,
		public_key,
		participants: plan.receivers,
		verification_shares,
		threshold: plan.threshold,
		confirmed_by: None,
		created_at: Utc::now(),
	};
	store.save_group_key(&group_key).await?;

	debug!(
		session_id = %ctx.session_id,
		key_id = %group_key.key_id,
		epoch = group_key.epoch,
		"Key shares combined"
	);
	Ok(group_key)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::InMemoryTransport;
	use std::sync::Arc;
	use std::time::Duration;
	use teleport_storage::StorageService;

	fn nodes(n: u8) -> Vec<NodeId> {
		(1..=n).map(|i| NodeId([i; 20])).collect()
	}

	fn context(local: Vec<NodeId>, storage: Arc<StorageService>) -> RoundContext {
		RoundContext {
			session_id: SessionId::new_v4(),
			transport: Arc::new(InMemoryTransport::new()),
			storage,
			local,
			round_timeout: Duration::from_millis(200),
		}
	}

	async fn run(ctx: &RoundContext, plan: DealPlan) -> Result<GroupPublicKey, ThresholdError> {
		let committed = commit(ctx, plan).await?;
		let dealt = deal(ctx, committed).await?;
		combine(ctx, dealt).await
	}

	#[tokio::test]
	async fn test_any_threshold_subset_recovers_group_key() {
		let participants = nodes(4);
		let storage = Arc::new(StorageService::in_memory());
		let ctx = context(participants.clone(), storage.clone());
		let key_id = Id::random();

		let plan = DealPlan::fresh(key_id, participants.clone(), 3, &participants);
		let key = run(&ctx, plan).await.unwrap();

		let store = KeyStore::new(&storage);
		let shares = store.shares_for(&key_id).await.unwrap();
		assert_eq!(shares.len(), 4);

		let subset: Vec<&KeyShare> = shares.iter().filter(|s| s.index != 2).collect();
		let indices: Vec<u32> = subset.iter().map(|s| s.index).collect();
		let secret: Scalar = subset
			.iter()
			.map(|s| lagrange_at_zero(s.index, &indices) * s.secret)
			.sum();
		assert_eq!(RistrettoPoint::mul_base(&secret), key.public_key);
	}

	#[tokio::test]
	async fn test_reshare_preserves_group_key() {
		let old = nodes(3);
		let storage = Arc::new(StorageService::in_memory());
		let all: Vec<NodeId> = nodes(5);
		let key_id = Id::random();

		let ctx = context(all.clone(), storage.clone());
		let key = run(&ctx, DealPlan::fresh(key_id, old.clone(), 2, &all))
			.await
			.unwrap();

		let store = KeyStore::new(&storage);
		let mut local_shares = Vec::new();
		for node in &old {
			local_shares.push(store.share(&key_id, 0, node).await.unwrap().unwrap());
		}
		let new_set = all[1..].to_vec();
		let plan = DealPlan::reshare(key.clone(), &local_shares, new_set.clone(), 3).unwrap();

		let ctx = context(all, storage.clone());
		let reshared = run(&ctx, plan).await.unwrap();
		assert_eq!(reshared.public_key, key.public_key);
		assert_eq!(reshared.epoch, 1);
		assert_eq!(reshared.participants, new_set);
		assert!(store.share(&key_id, 1, &old[0]).await.unwrap().is_none());
		assert!(store.share(&key_id, 1, &new_set[0]).await.unwrap().is_some());
		// Epoch 0 shares stay in place.
		assert!(store.share(&key_id, 0, &old[0]).await.unwrap().is_some());
	}

	#[tokio::test]
	async fn test_silent_member_fails_commit_round_without_persisting() {
		let participants = nodes(3);
		let local = participants[..2].to_vec();
		let storage = Arc::new(StorageService::in_memory());
		let ctx = context(local.clone(), storage.clone());
		let key_id = Id::random();

		let err = run(&ctx, DealPlan::fresh(key_id, participants, 2, &local))
			.await
			.unwrap_err();
		assert!(matches!(err, ThresholdError::Round { round: 1, .. }));
		assert!(KeyStore::new(&storage)
			.shares_for(&key_id)
			.await
			.unwrap()
			.is_empty());
	}
}
