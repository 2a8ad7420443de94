//! Block-operation applier.
//!
//! Transactions of a block are staged when the block is verified. When the
//! block is accepted its operations are replayed in recorded order, each at
//! most once, through the session manager, the settlement batcher, the
//! orchestrator and the validator set. Rejecting a block undoes only what was
//! staged locally.

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use teleport_orchestrator::TransferOrchestrator;
use teleport_settlement::SettlementBatcher;
use teleport_storage::{Namespace, StorageService};
use teleport_threshold::{SessionRequest, ThresholdSessionManager};
use teleport_types::{
	Block, BlockOperation, BlockTransaction, Id, MpcOperation, SessionId, SettlementType,
	StakeWindow, TeleportOperation, ValidatorNft, ValidatorOperation, ValidatorSet,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Result of replaying one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ApplyOutcome {
	Applied,
	/// The operation was valid but its effect was already in place.
	Unchanged,
	/// The operation could not take effect; recorded so it is never retried.
	Rejected(String),
}

/// Marker persisted per replayed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedOperation {
	pub block_id: Id,
	pub height: u64,
	pub outcome: ApplyOutcome,
	pub applied_at: DateTime<Utc>,
}

/// Counts for one accepted block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BlockReport {
	pub applied: usize,
	pub unchanged: usize,
	pub rejected: usize,
	/// Operations skipped because an earlier acceptance already replayed them.
	pub replayed: usize,
	pub intents_ready: usize,
}

/// What a block rejection undid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RejectReport {
	pub intents_removed: usize,
	pub sessions_aborted: usize,
}

#[derive(Default)]
struct StagedBlock {
	sessions: Vec<SessionId>,
}

pub struct BlockOperationApplier {
	orchestrator: TransferOrchestrator,
	sessions: ThresholdSessionManager,
	batcher: SettlementBatcher,
	validators: Arc<dyn ValidatorSet>,
	storage: Arc<StorageService>,
	staged: Mutex<HashMap<Id, StagedBlock>>,
}

impl BlockOperationApplier {
	pub fn new(
		orchestrator: TransferOrchestrator,
		sessions: ThresholdSessionManager,
		batcher: SettlementBatcher,
		validators: Arc<dyn ValidatorSet>,
		storage: Arc<StorageService>,
	) -> Self {
		Self {
			orchestrator,
			sessions,
			batcher,
			validators,
			storage,
			staged: Mutex::new(HashMap::new()),
		}
	}

	/// Stages the transactions of a verified block. Staging the same block
	/// twice is a no-op.
	pub async fn stage_block(&self, block: &Block) -> Result<(), CoreError> {
		if self.staged.lock().await.contains_key(&block.id) {
			return Ok(());
		}
		let mut staged = StagedBlock::default();
		for tx in &block.transactions {
			if let Some(session_id) = self.process_transaction(block.id, tx).await? {
				staged.sessions.push(session_id);
			}
		}
		debug!(
			block_id = %block.id,
			transactions = block.transactions.len(),
			sessions = staged.sessions.len(),
			"Staged block"
		);
		self.staged.lock().await.insert(block.id, staged);
		Ok(())
	}

	/// Stages one transaction. Returns the session it started, if any.
	pub async fn process_transaction(
		&self,
		block_id: Id,
		tx: &BlockTransaction,
	) -> Result<Option<SessionId>, CoreError> {
		match tx {
			BlockTransaction::TeleportIntent { intent } => {
				self.orchestrator
					.pool()
					.stage(block_id, intent.clone())
					.await?;
				Ok(None)
			},
			BlockTransaction::KeyGenRequest {
				key_id,
				participants,
				threshold,
			} => {
				let session_id = self
					.sessions
					.start_session(SessionRequest::KeyGen {
						key_id: *key_id,
						participants: participants.clone(),
						threshold: *threshold,
					})
					.await?;
				info!(block_id = %block_id, session_id = %session_id, key_id = %key_id, "Started requested key generation");
				Ok(Some(session_id))
			},
			// Validator updates take effect when the block is accepted.
			BlockTransaction::ValidatorUpdate { operation } => {
				debug!(block_id = %block_id, "Staged validator update {:?}", operation);
				Ok(None)
			},
		}
	}

	/// Replays an accepted block. Operations already replayed by an earlier
	/// acceptance are skipped; an operation that cannot take effect is
	/// recorded as rejected and does not stop the block. A block accepted
	/// before is not staged again.
	pub async fn accept_block(&self, block: &Block) -> Result<BlockReport, CoreError> {
		let accepted_key = format!("{}:accepted", block.id);
		let accepted_before = self
			.storage
			.exists(Namespace::AppliedOps, &accepted_key)
			.await?;
		if accepted_before {
			debug!(block_id = %block.id, "Block already accepted, replaying operations only");
		} else {
			self.stage_block(block).await?;
		}
		let mut report = BlockReport::default();

		for (index, tx) in block.transactions.iter().enumerate() {
			if let BlockTransaction::ValidatorUpdate { operation } = tx {
				let key = format!("{}:tx:{}", block.id, index);
				let replayed = self
					.apply_once(block, &key, self.process_validator_op(operation))
					.await?;
				report.record(replayed);
			}
		}
		for (index, op) in block.operations.iter().enumerate() {
			let key = block.operation_key(index);
			let replayed = self.apply_once(block, &key, self.process_operation(op)).await?;
			report.record(replayed);
		}

		if !accepted_before {
			report.intents_ready = self.orchestrator.pool().accept_block(&block.id).await;
			let marker = AppliedOperation {
				block_id: block.id,
				height: block.height,
				outcome: ApplyOutcome::Applied,
				applied_at: Utc::now(),
			};
			self.storage
				.store(Namespace::AppliedOps, &accepted_key, &marker)
				.await?;
		}
		self.staged.lock().await.remove(&block.id);
		info!(
			block_id = %block.id,
			height = block.height,
			applied = report.applied,
			unchanged = report.unchanged,
			rejected = report.rejected,
			replayed = report.replayed,
			"Accepted block"
		);
		Ok(report)
	}

	/// Removes the intents a rejected block introduced and aborts the
	/// sessions it started or referenced.
	pub async fn reject_block(&self, block: &Block) -> RejectReport {
		let staged = self.staged.lock().await.remove(&block.id).unwrap_or_default();
		let mut sessions = staged.sessions;
		sessions.extend(block.operations.iter().filter_map(|op| match op {
			BlockOperation::Mpc { op } => Some(mpc_session(op)),
			_ => None,
		}));
		sessions.sort();
		sessions.dedup();

		let mut report = RejectReport {
			intents_removed: self.orchestrator.pool().reject_block(&block.id).await,
			sessions_aborted: 0,
		};
		for session_id in sessions {
			let running = self
				.sessions
				.session(session_id)
				.await
				.is_some_and(|info| !info.state.is_terminal());
			if running && self.sessions.cleanup_session(session_id).await.is_ok() {
				report.sessions_aborted += 1;
			}
		}
		info!(
			block_id = %block.id,
			intents_removed = report.intents_removed,
			sessions_aborted = report.sessions_aborted,
			"Rejected block"
		);
		report
	}

	/// Whether the operation stored under `key` was already replayed.
	pub async fn applied(&self, key: &str) -> Result<Option<AppliedOperation>, CoreError> {
		Ok(self.storage.try_retrieve(Namespace::AppliedOps, key).await?)
	}

	/// Runs `apply` unless `key` is already marked, then marks it. Returns
	/// `None` for a skipped replay.
	async fn apply_once<F>(
		&self,
		block: &Block,
		key: &str,
		apply: F,
	) -> Result<Option<ApplyOutcome>, CoreError>
	where
		F: std::future::Future<Output = Result<bool, CoreError>>,
	{
		if self.storage.exists(Namespace::AppliedOps, key).await? {
			debug!(key, "Operation already applied");
			return Ok(None);
		}
		let outcome = match apply.await {
			Ok(true) => ApplyOutcome::Applied,
			Ok(false) => ApplyOutcome::Unchanged,
			Err(e) if e.is_fatal() => return Err(e),
			Err(e) => {
				warn!(key, "Operation rejected: {}", e);
				ApplyOutcome::Rejected(e.to_string())
			},
		};
		let record = AppliedOperation {
			block_id: block.id,
			height: block.height,
			outcome: outcome.clone(),
			applied_at: Utc::now(),
		};
		self.storage
			.store(Namespace::AppliedOps, key, &record)
			.await?;
		Ok(Some(outcome))
	}

	/// Applies one operation. Returns whether it changed anything.
	pub async fn process_operation(&self, op: &BlockOperation) -> Result<bool, CoreError> {
		match op {
			BlockOperation::Teleport { op } => self.process_teleport_op(op).await,
			BlockOperation::Mpc { op } => self.process_mpc_op(op).await,
			BlockOperation::Validator { op } => self.process_validator_op(op).await,
		}
	}

	pub async fn process_teleport_op(&self, op: &TeleportOperation) -> Result<bool, CoreError> {
		let changed = match op {
			TeleportOperation::Mint {
				settlement_id,
				tx_id,
			} => {
				self.batcher
					.apply_status(*settlement_id, SettlementType::Mint, *tx_id)
					.await?
			},
			TeleportOperation::Burn {
				settlement_id,
				tx_id,
			} => {
				self.batcher
					.apply_status(*settlement_id, SettlementType::Burn, *tx_id)
					.await?
			},
			TeleportOperation::SettlementFailed {
				settlement_id,
				reason,
			} => self.batcher.fail_settlement(*settlement_id, reason).await?,
			TeleportOperation::Refund {
				transfer_id,
				reason,
			} => self.orchestrator.refund(*transfer_id, reason).await?,
		};
		Ok(changed)
	}

	pub async fn process_mpc_op(&self, op: &MpcOperation) -> Result<bool, CoreError> {
		match op {
			MpcOperation::KeyGenCompleted {
				session_id,
				key_id,
				public_key,
			} => {
				self.sessions
					.store_keygen_result(*session_id, *key_id, public_key)
					.await?
			},
			MpcOperation::SignatureProduced {
				session_id,
				signature,
				signers,
			} => {
				self.sessions
					.store_signature(*session_id, signature, signers.clone())
					.await?
			},
			MpcOperation::KeySharesUpdated {
				session_id,
				key_id,
				public_key,
			} => {
				self.sessions
					.update_key_shares(*session_id, *key_id, public_key)
					.await?
			},
			MpcOperation::SessionAborted { session_id } => {
				self.sessions.cleanup_session(*session_id).await?
			},
		}
		Ok(true)
	}

	pub async fn process_validator_op(&self, op: &ValidatorOperation) -> Result<bool, CoreError> {
		match op {
			ValidatorOperation::Add {
				node_id,
				weight,
				window,
			} => self.validators.add_validator(*node_id, *weight, *window).await?,
			ValidatorOperation::Remove { node_id } => {
				self.validators.remove_validator(*node_id).await?
			},
			ValidatorOperation::Update { node_id, weight } => {
				self.validators.update_validator(*node_id, *weight).await?
			},
			ValidatorOperation::NftStake {
				nft_asset_id,
				node_id,
				owner,
				stake_amount,
				window,
				delegation_fee,
			} => {
				let StakeWindow { start, end } = *window;
				self.orchestrator
					.stake_validator_nft(ValidatorNft {
						nft_asset_id: *nft_asset_id,
						node_id: *node_id,
						owner: owner.clone(),
						stake_amount: *stake_amount,
						stake_start: start,
						stake_end: end,
						delegation_fee: *delegation_fee,
						active: true,
					})
					.await?
			},
			ValidatorOperation::NftUnstake { nft_asset_id } => {
				let was_active = self
					.orchestrator
					.validator_nfts()
					.get(nft_asset_id)
					.is_some_and(|nft| nft.active);
				self.orchestrator.unstake_validator_nft(nft_asset_id).await?;
				return Ok(was_active);
			},
		}
		Ok(true)
	}
}

impl BlockReport {
	fn record(&mut self, outcome: Option<ApplyOutcome>) {
		match outcome {
			Some(ApplyOutcome::Applied) => self.applied += 1,
			Some(ApplyOutcome::Unchanged) => self.unchanged += 1,
			Some(ApplyOutcome::Rejected(_)) => self.rejected += 1,
			None => self.replayed += 1,
		}
	}
}

fn mpc_session(op: &MpcOperation) -> SessionId {
	match op {
		MpcOperation::KeyGenCompleted { session_id, .. }
		| MpcOperation::SignatureProduced { session_id, .. }
		| MpcOperation::KeySharesUpdated { session_id, .. }
		| MpcOperation::SessionAborted { session_id } => *session_id,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{NodeBuilder, TeleportNode};
	use chrono::Duration as ChronoDuration;
	use ed25519_dalek::SigningKey;
	use rand::rngs::OsRng;
	use std::collections::BTreeMap;
	use std::time::Duration;
	use teleport_orchestrator::{sender_address, sign_intent};
	use teleport_types::{
		Address, AssetIdentifier, AssetType, IntentType, NodeId, SessionState, SettlementStatus,
		TeleportAsset, TeleportIntent, TransferStatus,
	};

	const TOKEN: Id = Id([5; 32]);

	async fn started_node() -> TeleportNode {
		let node = NodeBuilder::new(crate::tests::config()).build().unwrap();
		node.start().await.unwrap();
		node.orchestrator()
			.registry()
			.register(TeleportAsset {
				id: TOKEN,
				asset_type: AssetType::Fungible,
				symbol: "TKN".into(),
				origin_chain: "c-chain".into(),
				current_chain: "c-chain".into(),
				in_flight: false,
			})
			.await
			.unwrap();
		node
	}

	fn mint_intent(key: &SigningKey, amount: u64) -> TeleportIntent {
		let mut intent = TeleportIntent {
			id: Id::random(),
			intent_type: IntentType::Bridge,
			source_asset: AssetIdentifier::new("c-chain".into(), TOKEN),
			dest_asset: AssetIdentifier::new("x-chain".into(), TOKEN),
			amount,
			sender: sender_address(key),
			recipient: Address(vec![4; 20]),
			deadline: Utc::now() + ChronoDuration::minutes(5),
			signature: Vec::new(),
			metadata: BTreeMap::new(),
		};
		sign_intent(key, &mut intent);
		intent
	}

	fn block(height: u64, transactions: Vec<BlockTransaction>, operations: Vec<BlockOperation>) -> Block {
		Block {
			id: Id::random(),
			height,
			transactions,
			operations,
		}
	}

	fn window() -> StakeWindow {
		StakeWindow {
			start: Utc::now(),
			end: Utc::now() + ChronoDuration::days(30),
		}
	}

	#[tokio::test]
	async fn test_replayed_block_applies_once() {
		let node = started_node().await;
		let key = SigningKey::generate(&mut OsRng);
		let transfer = node
			.orchestrator()
			.process_intent(mint_intent(&key, 12))
			.await
			.unwrap();
		let settlement_id = transfer.settlement_ids[0];
		let tx_id = Id([8; 32]);

		let mint = block(
			1,
			Vec::new(),
			vec![BlockOperation::Teleport {
				op: TeleportOperation::Mint {
					settlement_id,
					tx_id,
				},
			}],
		);
		let applier = node.applier();
		let report = applier.accept_block(&mint).await.unwrap();
		assert_eq!(report.applied, 1);

		let settlement = node
			.batcher()
			.get_settlement(settlement_id)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(settlement.status, SettlementStatus::Completed);
		assert_eq!(settlement.tx_id, Some(tx_id));

		let replay = applier.accept_block(&mint).await.unwrap();
		assert_eq!(replay.applied, 0);
		assert_eq!(replay.replayed, 1);
		assert_eq!(node.batcher().stats().await.completed, 1);

		// A burn for the same settlement never takes effect.
		let burn = block(
			2,
			Vec::new(),
			vec![BlockOperation::Teleport {
				op: TeleportOperation::Burn {
					settlement_id,
					tx_id,
				},
			}],
		);
		let report = applier.accept_block(&burn).await.unwrap();
		assert_eq!(report.rejected, 1);
		let record = applier.applied(&burn.operation_key(0)).await.unwrap().unwrap();
		assert!(matches!(record.outcome, ApplyOutcome::Rejected(_)));
		assert_eq!(record.height, 2);

		for _ in 0..200 {
			let current = node
				.orchestrator()
				.get_transfer(transfer.id)
				.await
				.unwrap()
				.unwrap();
			if current.status == TransferStatus::Completed {
				node.shutdown().await.unwrap();
				return;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		panic!("transfer did not complete");
	}

	#[tokio::test]
	async fn test_reaccepted_block_is_not_staged_again() {
		let node = started_node().await;
		let key = SigningKey::generate(&mut OsRng);
		let key_id = Id([3; 32]);
		let accepted = block(
			4,
			vec![
				BlockTransaction::TeleportIntent {
					intent: mint_intent(&key, 4),
				},
				BlockTransaction::KeyGenRequest {
					key_id,
					participants: vec![NodeId([1; 20]), NodeId([9; 20])],
					threshold: 1,
				},
				BlockTransaction::ValidatorUpdate {
					operation: ValidatorOperation::Add {
						node_id: NodeId([0x56; 20]),
						weight: 10,
						window: window(),
					},
				},
			],
			Vec::new(),
		);
		let keygen_sessions = |node: &TeleportNode| {
			let sessions = node.sessions().clone();
			async move {
				sessions
					.active_sessions()
					.await
					.into_iter()
					.filter(|s| s.key_id == key_id)
					.count()
			}
		};

		let applier = node.applier();
		let first = applier.accept_block(&accepted).await.unwrap();
		assert_eq!(first.intents_ready, 1);
		assert_eq!(first.applied, 1);
		assert_eq!(keygen_sessions(&node).await, 1);

		let again = applier.accept_block(&accepted).await.unwrap();
		assert_eq!(again.intents_ready, 0);
		assert_eq!(again.applied, 0);
		assert_eq!(again.replayed, 1);
		assert_eq!(keygen_sessions(&node).await, 1);
		assert_eq!(node.validators().validator_count().await.unwrap(), 1);
		node.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn test_rejected_block_drops_intents_and_aborts_sessions() {
		let node = started_node().await;
		let key = SigningKey::generate(&mut OsRng);
		let intent = mint_intent(&key, 3);
		let intent_id = intent.id;
		let rejected = block(
			5,
			vec![
				BlockTransaction::TeleportIntent { intent },
				BlockTransaction::KeyGenRequest {
					key_id: Id([3; 32]),
					// The second participant is remote and never answers.
					participants: vec![NodeId([1; 20]), NodeId([9; 20])],
					threshold: 1,
				},
			],
			Vec::new(),
		);

		let applier = node.applier();
		applier.stage_block(&rejected).await.unwrap();
		assert!(node.orchestrator().pool().contains(&intent_id).await);
		let session = node
			.sessions()
			.active_sessions()
			.await
			.into_iter()
			.find(|s| s.key_id == Id([3; 32]))
			.unwrap();

		let report = applier.reject_block(&rejected).await;
		assert_eq!(report.intents_removed, 1);
		assert_eq!(report.sessions_aborted, 1);
		assert!(node.orchestrator().pool().is_empty().await);
		let (_, state) = node.sessions().get_result(session.id).await.unwrap();
		assert_eq!(state, SessionState::Aborted);
		node.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn test_accepted_block_readies_intents_and_updates_validators() {
		let node = started_node().await;
		let key = SigningKey::generate(&mut OsRng);
		let nft = Id([6; 32]);
		let accepted = block(
			7,
			vec![
				BlockTransaction::TeleportIntent {
					intent: mint_intent(&key, 9),
				},
				BlockTransaction::ValidatorUpdate {
					operation: ValidatorOperation::Add {
						node_id: NodeId([0x55; 20]),
						weight: 10,
						window: window(),
					},
				},
			],
			vec![
				BlockOperation::Validator {
					op: ValidatorOperation::NftStake {
						nft_asset_id: nft,
						node_id: NodeId([0x66; 20]),
						owner: Address(vec![1; 32]),
						stake_amount: 2_000,
						window: window(),
						delegation_fee: 100,
					},
				},
				BlockOperation::Validator {
					op: ValidatorOperation::Update {
						node_id: NodeId([0x55; 20]),
						weight: 20,
					},
				},
				BlockOperation::Validator {
					op: ValidatorOperation::NftUnstake { nft_asset_id: nft },
				},
				BlockOperation::Validator {
					op: ValidatorOperation::Remove {
						node_id: NodeId([0x77; 20]),
					},
				},
			],
		);

		let report = node.applier().accept_block(&accepted).await.unwrap();
		assert_eq!(report.intents_ready, 1);
		assert_eq!(report.applied, 4);
		assert_eq!(report.rejected, 1);
		assert_eq!(node.validators().validator_count().await.unwrap(), 1);
		let record = node.orchestrator().validator_nfts().get(&nft).unwrap();
		assert!(!record.active);

		for _ in 0..100 {
			if !node.orchestrator().active_transfers().await.is_empty() {
				break;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		assert_eq!(node.orchestrator().active_transfers().await.len(), 1);
		node.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn test_mpc_operations_are_stored() {
		let node = started_node().await;
		let key_id = node.config().threshold.signing_key_id;
		let group_key = node.sessions().group_key(&key_id).await.unwrap().unwrap();
		let confirm = SessionId::new_v4();
		let signing = SessionId::new_v4();
		let accepted = block(
			9,
			Vec::new(),
			vec![
				BlockOperation::Mpc {
					op: MpcOperation::KeyGenCompleted {
						session_id: confirm,
						key_id,
						public_key: group_key.public_key_bytes(),
					},
				},
				BlockOperation::Mpc {
					op: MpcOperation::SignatureProduced {
						session_id: signing,
						signature: vec![7; 64],
						signers: vec![NodeId([1; 20]), NodeId([2; 20])],
					},
				},
				BlockOperation::Mpc {
					op: MpcOperation::KeySharesUpdated {
						session_id: confirm,
						key_id,
						public_key: vec![0; 32],
					},
				},
			],
		);
		let report = node.applier().accept_block(&accepted).await.unwrap();
		assert_eq!(report.applied, 2);
		assert_eq!(report.rejected, 1);

		let stored = node.sessions().group_key(&key_id).await.unwrap().unwrap();
		assert_eq!(stored.confirmed_by, Some(confirm));
		let signature = node.sessions().signature(&signing).await.unwrap().unwrap();
		assert_eq!(signature.signers.len(), 2);
		node.shutdown().await.unwrap();
	}
}
