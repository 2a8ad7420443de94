//! Proof-gated batching of settlement-chain mints and burns.

use crate::proof::verify_bundle;
use crate::tx::{build_burn, build_mint};
use crate::SettlementError;
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use teleport_config::{FailurePolicy, SettlementConfig};
use teleport_storage::{Namespace, StorageService};
use teleport_types::{
	Address, ChainId, EventBus, Id, ProofContext, ProofVerifier, Settlement,
	SettlementChainClient, SettlementEvent, SettlementId, SettlementStatus, SettlementType,
	SignedSettlementTx, TeleportEvent, TeleportProof, TransactionSigner,
};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Counters exposed through [`SettlementBatcher::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SettlementStats {
	pub pending: usize,
	pub transactions_issued: u64,
	pub completed: u64,
	pub failed: u64,
}

#[derive(Default)]
struct BatchQueue {
	items: Vec<SettlementId>,
	/// Bumped on every flush so a stale interval timer flushes nothing.
	generation: u64,
}

impl BatchQueue {
	fn take(&mut self) -> Vec<SettlementId> {
		self.generation += 1;
		std::mem::take(&mut self.items)
	}
}

#[derive(Default)]
struct History {
	by_id: HashMap<SettlementId, Settlement>,
	order: VecDeque<SettlementId>,
}

impl History {
	fn push(&mut self, settlement: Settlement, limit: usize) {
		let id = settlement.id;
		if self.by_id.insert(id, settlement).is_none() {
			self.order.push_back(id);
		}
		while self.order.len() > limit {
			if let Some(old) = self.order.pop_front() {
				self.by_id.remove(&old);
			}
		}
	}
}

struct Inner {
	config: SettlementConfig,
	settlement_chain: ChainId,
	chain: Arc<dyn SettlementChainClient>,
	verifier: Arc<dyn ProofVerifier>,
	signer: Arc<dyn TransactionSigner>,
	storage: Arc<StorageService>,
	events: EventBus,
	pending: RwLock<HashMap<SettlementId, Settlement>>,
	queue: Mutex<BatchQueue>,
	history: RwLock<History>,
	tasks: Mutex<JoinSet<()>>,
	transactions_issued: AtomicU64,
	completed: AtomicU64,
	failed: AtomicU64,
}

/// Accumulates settlements and commits them as batched settlement-chain transactions.
///
/// A queue is flushed when it reaches `batch_size` or when `batch_interval`
/// has passed since its first item arrived. Every flushed unit yields at most
/// one mint and one burn transaction, and all settlements of a transaction
/// share its outcome.
#[derive(Clone)]
pub struct SettlementBatcher {
	inner: Arc<Inner>,
}

impl SettlementBatcher {
	pub fn new(
		config: SettlementConfig,
		chain: Arc<dyn SettlementChainClient>,
		verifier: Arc<dyn ProofVerifier>,
		signer: Arc<dyn TransactionSigner>,
		storage: Arc<StorageService>,
		events: EventBus,
	) -> Self {
		Self {
			inner: Arc::new(Inner {
				settlement_chain: chain.chain_id().clone(),
				config,
				chain,
				verifier,
				signer,
				storage,
				events,
				pending: RwLock::new(HashMap::new()),
				queue: Mutex::new(BatchQueue::default()),
				history: RwLock::new(History::default()),
				tasks: Mutex::new(JoinSet::new()),
				transactions_issued: AtomicU64::new(0),
				completed: AtomicU64::new(0),
				failed: AtomicU64::new(0),
			}),
		}
	}

	pub fn settlement_chain(&self) -> &ChainId {
		&self.inner.settlement_chain
	}

	/// Queues a mint of `amount` to `recipient` for assets arriving from `source_chain`.
	pub async fn process_incoming_assets(
		&self,
		source_chain: ChainId,
		asset_id: Id,
		amount: u64,
		recipient: Address,
		proof: TeleportProof,
	) -> Result<Settlement, SettlementError> {
		check_request(amount, &recipient)?;
		let context = ProofContext {
			kind: SettlementType::Mint,
			chain: source_chain.clone(),
			asset_id,
			amount,
			party: recipient.clone(),
		};
		verify_bundle(self.inner.verifier.as_ref(), &proof, &context).await?;

		let settlement = new_settlement(
			SettlementType::Mint,
			asset_id,
			amount,
			source_chain,
			self.inner.settlement_chain.clone(),
			recipient,
			proof,
		);
		self.enqueue(settlement).await
	}

	/// Queues a burn of `amount` from `sender` for assets leaving to `dest_chain`.
	pub async fn process_outgoing_assets(
		&self,
		dest_chain: ChainId,
		asset_id: Id,
		amount: u64,
		sender: Address,
		proof: TeleportProof,
	) -> Result<Settlement, SettlementError> {
		check_request(amount, &sender)?;
		let context = ProofContext {
			kind: SettlementType::Burn,
			chain: dest_chain.clone(),
			asset_id,
			amount,
			party: sender.clone(),
		};
		verify_bundle(self.inner.verifier.as_ref(), &proof, &context).await?;

		let settlement = new_settlement(
			SettlementType::Burn,
			asset_id,
			amount,
			self.inner.settlement_chain.clone(),
			dest_chain,
			sender,
			proof,
		);
		{
			// Balance check and reservation happen under one guard.
			let mut pending = self.inner.pending.write().await;
			let balance = self
				.inner
				.chain
				.get_balance(&settlement.party, &asset_id)
				.await?;
			let reserved: u64 = pending
				.values()
				.filter(|s| {
					s.settlement_type == SettlementType::Burn
						&& s.party == settlement.party
						&& s.asset_id == asset_id
				})
				.map(|s| s.amount)
				.sum();
			let have = balance.saturating_sub(reserved);
			if have < amount {
				return Err(SettlementError::InsufficientBalance { have, need: amount });
			}
			pending.insert(settlement.id, settlement.clone());
		}
		self.persist_queued(settlement).await
	}

	async fn enqueue(&self, settlement: Settlement) -> Result<Settlement, SettlementError> {
		self.inner
			.pending
			.write()
			.await
			.insert(settlement.id, settlement.clone());
		self.persist_queued(settlement).await
	}

	/// Persists a settlement already in the pending map and queues it for
	/// batching. A settlement that cannot be persisted is withdrawn.
	async fn persist_queued(&self, settlement: Settlement) -> Result<Settlement, SettlementError> {
		let inner = &self.inner;
		let id = settlement.id;
		if let Err(e) = inner
			.storage
			.store(Namespace::Settlements, &id.to_string(), &settlement)
			.await
		{
			inner.pending.write().await.remove(&id);
			return Err(e.into());
		}
		info!(
			settlement_id = %id,
			asset_id = %settlement.asset_id,
			amount = settlement.amount,
			"Queued {} settlement", settlement.settlement_type
		);
		inner.publish(SettlementEvent::Queued {
			settlement_id: id,
			settlement_type: settlement.settlement_type,
		});

		let (full, timer) = {
			let mut queue = inner.queue.lock().await;
			queue.items.push(id);
			if queue.items.len() >= inner.config.batch_size {
				(Some(queue.take()), None)
			} else if queue.items.len() == 1 {
				(None, Some(queue.generation))
			} else {
				(None, None)
			}
		};

		let mut tasks = inner.tasks.lock().await;
		while tasks.try_join_next().is_some() {}
		if let Some(unit) = full {
			debug!(size = unit.len(), "Batch full, flushing");
			let worker = inner.clone();
			tasks.spawn(async move { worker.process_unit(unit).await });
		}
		if let Some(generation) = timer {
			let worker = inner.clone();
			let interval = inner.config.batch_interval();
			tasks.spawn(async move {
				tokio::time::sleep(interval).await;
				let unit = {
					let mut queue = worker.queue.lock().await;
					(queue.generation == generation && !queue.items.is_empty()).then(|| queue.take())
				};
				if let Some(unit) = unit {
					debug!(size = unit.len(), "Batch interval elapsed, flushing");
					worker.process_unit(unit).await;
				}
			});
		}
		Ok(settlement)
	}

	/// Flushes the current queue and waits for the resulting transactions.
	pub async fn flush_now(&self) {
		let unit = self.inner.queue.lock().await.take();
		if !unit.is_empty() {
			self.inner.process_unit(unit).await;
		}
	}

	/// Marks a settlement completed by `tx_id`, as recorded in an accepted
	/// block. Returns whether anything changed; replays are no-ops.
	pub async fn apply_status(
		&self,
		settlement_id: SettlementId,
		expected: SettlementType,
		tx_id: Id,
	) -> Result<bool, SettlementError> {
		let current = self
			.get_settlement(settlement_id)
			.await?
			.ok_or(SettlementError::NotFound(settlement_id))?;
		if current.settlement_type != expected {
			return Err(SettlementError::TypeMismatch {
				settlement_id,
				expected,
				actual: current.settlement_type,
			});
		}
		match current.status {
			SettlementStatus::Completed => return Ok(false),
			SettlementStatus::Failed => {
				return Err(SettlementError::AlreadyFinal {
					settlement_id,
					status: SettlementStatus::Failed,
				})
			},
			_ => {},
		}
		Ok(self
			.inner
			.finalize(settlement_id, Some(current), SettlementStatus::Completed, Some(tx_id), None)
			.await)
	}

	/// Marks a settlement failed, as recorded in an accepted block.
	pub async fn fail_settlement(
		&self,
		settlement_id: SettlementId,
		reason: &str,
	) -> Result<bool, SettlementError> {
		let current = self
			.get_settlement(settlement_id)
			.await?
			.ok_or(SettlementError::NotFound(settlement_id))?;
		match current.status {
			SettlementStatus::Failed => Ok(false),
			SettlementStatus::Completed => Err(SettlementError::AlreadyFinal {
				settlement_id,
				status: SettlementStatus::Completed,
			}),
			_ => Ok(self
				.inner
				.finalize(
					settlement_id,
					Some(current),
					SettlementStatus::Failed,
					None,
					Some(reason.to_string()),
				)
				.await),
		}
	}

	/// Looks a settlement up in the pending map, recent history, then storage.
	pub async fn get_settlement(
		&self,
		settlement_id: SettlementId,
	) -> Result<Option<Settlement>, SettlementError> {
		if let Some(s) = self.inner.pending.read().await.get(&settlement_id) {
			return Ok(Some(s.clone()));
		}
		if let Some(s) = self.inner.history.read().await.by_id.get(&settlement_id) {
			return Ok(Some(s.clone()));
		}
		Ok(self
			.inner
			.storage
			.try_retrieve(Namespace::Settlements, &settlement_id.to_string())
			.await?)
	}

	pub async fn pending_count(&self) -> usize {
		self.inner.pending.read().await.len()
	}

	pub async fn stats(&self) -> SettlementStats {
		SettlementStats {
			pending: self.pending_count().await,
			transactions_issued: self.inner.transactions_issued.load(Ordering::Relaxed),
			completed: self.inner.completed.load(Ordering::Relaxed),
			failed: self.inner.failed.load(Ordering::Relaxed),
		}
	}

	/// Waits for shutdown, then flushes what is queued and drains in-flight batches.
	pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), SettlementError> {
		let _ = shutdown.recv().await;
		info!("Settlement batcher shutting down, flushing queue");
		self.flush_now().await;
		let mut tasks = self.inner.tasks.lock().await;
		while tasks.join_next().await.is_some() {}
		Ok(())
	}
}

fn check_request(amount: u64, party: &Address) -> Result<(), SettlementError> {
	if amount == 0 {
		return Err(SettlementError::InvalidRequest("amount must be positive".into()));
	}
	if party.is_empty() {
		return Err(SettlementError::InvalidRequest("empty settlement account".into()));
	}
	Ok(())
}

fn new_settlement(
	settlement_type: SettlementType,
	asset_id: Id,
	amount: u64,
	source_chain: ChainId,
	dest_chain: ChainId,
	party: Address,
	proof: TeleportProof,
) -> Settlement {
	let now = Utc::now();
	Settlement {
		id: SettlementId::new_v4(),
		settlement_type,
		asset_id,
		amount,
		source_chain,
		dest_chain,
		party,
		proof,
		status: SettlementStatus::Pending,
		tx_id: None,
		error: None,
		created_at: now,
		updated_at: now,
	}
}

impl Inner {
	fn publish(&self, event: SettlementEvent) {
		self.events.publish(TeleportEvent::Settlement(event)).ok();
	}

	async fn process_unit(&self, unit: Vec<SettlementId>) {
		let mut mints = Vec::new();
		let mut burns = Vec::new();
		{
			let mut pending = self.pending.write().await;
			for id in unit {
				let Some(settlement) = pending.get_mut(&id) else {
					continue;
				};
				if !settlement.set_status(SettlementStatus::InProgress) {
					continue;
				}
				match settlement.settlement_type {
					SettlementType::Mint => mints.push(settlement.clone()),
					SettlementType::Burn => burns.push(settlement.clone()),
				}
			}
		}

		for group in [mints, burns] {
			if !group.is_empty() {
				self.settle_group(group).await;
			}
		}
	}

	async fn settle_group(&self, group: Vec<Settlement>) {
		let kind = group[0].settlement_type;
		match self.submit(kind, &group).await {
			Ok(tx_id) => self.complete_group(group, tx_id).await,
			Err(e) if self.config.failure_policy == FailurePolicy::Isolate && group.len() > 1 => {
				warn!(
					"{} transaction for {} settlements failed, resubmitting individually: {}",
					kind,
					group.len(),
					e
				);
				for settlement in group {
					match self.submit(kind, slice::from_ref(&settlement)).await {
						Ok(tx_id) => self.complete_group(vec![settlement], tx_id).await,
						Err(e) => self.fail_group(vec![settlement], &e).await,
					}
				}
			},
			Err(e) => self.fail_group(group, &e).await,
		}
	}

	/// Builds, signs and issues one transaction. No settlement lock is held.
	async fn submit(&self, kind: SettlementType, group: &[Settlement]) -> Result<Id, SettlementError> {
		let tx = match kind {
			SettlementType::Mint => build_mint(group),
			SettlementType::Burn => {
				let mut parties: Vec<Address> = group.iter().map(|s| s.party.clone()).collect();
				parties.sort();
				parties.dedup();
				let utxos = self.chain.get_utxos(&parties).await?;
				build_burn(group, &utxos)?
			},
		};

		let outcome = self.signer.sign(&tx.signing_hash()).await?;
		let signed = SignedSettlementTx {
			tx,
			signature: outcome.signature,
			signing_session: outcome.session_id,
		};
		let bytes = signed
			.to_bytes()
			.map_err(|e| SettlementError::Encoding(e.to_string()))?;
		let tx_id = self.chain.issue_tx(&bytes).await?;

		self.transactions_issued.fetch_add(1, Ordering::Relaxed);
		info!(
			tx_id = %tx_id,
			signing_session = %signed.signing_session,
			"Issued {} transaction for {} settlements", kind, group.len()
		);
		Ok(tx_id)
	}

	async fn complete_group(&self, group: Vec<Settlement>, tx_id: Id) {
		self.publish(SettlementEvent::Submitted {
			settlement_ids: group.iter().map(|s| s.id).collect(),
			tx_id,
		});
		for settlement in group {
			self.finalize(settlement.id, None, SettlementStatus::Completed, Some(tx_id), None)
				.await;
		}
	}

	async fn fail_group(&self, group: Vec<Settlement>, error: &SettlementError) {
		warn!("Settlement group of {} failed: {}", group.len(), error);
		let reason = error.to_string();
		for settlement in group {
			self.finalize(settlement.id, None, SettlementStatus::Failed, None, Some(reason.clone()))
				.await;
		}
	}

	/// Moves a settlement to a terminal status, persists it and announces it.
	/// Returns false if it was already terminal.
	///
	/// `fallback` is used for settlements known only from storage; it is
	/// ignored once the settlement reached the in-memory history.
	async fn finalize(
		&self,
		id: SettlementId,
		fallback: Option<Settlement>,
		status: SettlementStatus,
		tx_id: Option<Id>,
		error: Option<String>,
	) -> bool {
		let removed = self.pending.write().await.remove(&id);
		let mut settlement = match removed {
			Some(settlement) => settlement,
			None => {
				let finished = self.history.read().await.by_id.contains_key(&id);
				match fallback {
					Some(settlement) if !finished => settlement,
					_ => {
						debug!(settlement_id = %id, "Settlement no longer pending");
						return false;
					},
				}
			},
		};
		if status == SettlementStatus::Completed && settlement.status == SettlementStatus::Pending {
			settlement.set_status(SettlementStatus::InProgress);
		}
		if !settlement.set_status(status) {
			debug!(settlement_id = %id, "Settlement already {}", settlement.status);
			return false;
		}
		settlement.tx_id = tx_id.or(settlement.tx_id);
		settlement.error = error.clone();

		if let Err(e) = self
			.storage
			.store(Namespace::Settlements, &id.to_string(), &settlement)
			.await
		{
			warn!(settlement_id = %id, "Failed to persist settlement: {}", e);
		}
		self.history
			.write()
			.await
			.push(settlement, self.config.history_limit);

		match (status, tx_id) {
			(SettlementStatus::Completed, Some(tx_id)) => {
				self.completed.fetch_add(1, Ordering::Relaxed);
				info!(settlement_id = %id, tx_id = %tx_id, "Settlement completed");
				self.publish(SettlementEvent::Completed {
					settlement_id: id,
					tx_id,
				});
			},
			_ => {
				self.failed.fetch_add(1, Ordering::Relaxed);
				let error = error.unwrap_or_else(|| status.to_string());
				warn!(settlement_id = %id, "Settlement failed: {}", error);
				self.publish(SettlementEvent::Failed {
					settlement_id: id,
					error,
				});
			},
		}
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use std::time::Duration;
	use teleport_chains::{DigestProofSystem, LocalSettlementChain};
	use teleport_types::{
		circuits, ProofGenerator, SessionId, SignatureOutcome, SignerError,
	};

	struct StaticSigner;

	#[async_trait]
	impl TransactionSigner for StaticSigner {
		async fn sign(&self, _payload: &[u8]) -> Result<SignatureOutcome, SignerError> {
			Ok(SignatureOutcome {
				session_id: SessionId::new_v4(),
				signature: vec![0; 64],
			})
		}
	}

	struct Fixture {
		batcher: SettlementBatcher,
		chain: Arc<LocalSettlementChain>,
		proofs: DigestProofSystem,
	}

	fn fixture(config: SettlementConfig) -> Fixture {
		let chain = Arc::new(LocalSettlementChain::new("x-chain".into()));
		let batcher = SettlementBatcher::new(
			config,
			chain.clone(),
			Arc::new(DigestProofSystem::new()),
			Arc::new(StaticSigner),
			Arc::new(StorageService::in_memory()),
			EventBus::new(64),
		);
		Fixture {
			batcher,
			chain,
			proofs: DigestProofSystem::new(),
		}
	}

	fn config(batch_size: usize, batch_interval_ms: u64) -> SettlementConfig {
		SettlementConfig {
			batch_size,
			batch_interval_ms,
			..SettlementConfig::default()
		}
	}

	const ASSET: Id = Id([5; 32]);

	fn account(n: u8) -> Address {
		Address(vec![n; 20])
	}

	async fn proof(proofs: &DigestProofSystem, context: ProofContext) -> TeleportProof {
		let inputs = context.public_inputs();
		let part = |circuit: &'static str| proofs.generate_proof(circuit, &inputs);
		TeleportProof {
			transfer_proof: part(circuits::TRANSFER).await.unwrap(),
			source_state_proof: part(circuits::SOURCE_STATE).await.unwrap(),
			dest_state_proof: part(circuits::DEST_STATE).await.unwrap(),
			asset_validity_proof: part(circuits::ASSET_VALIDITY).await.unwrap(),
			execution_proof: None,
			validator_signatures: Vec::new(),
			proof_system: "digest-v1".into(),
			generated_at: Utc::now(),
		}
	}

	async fn mint(f: &Fixture, amount: u64, to: Address) -> Result<Settlement, SettlementError> {
		let p = proof(
			&f.proofs,
			ProofContext {
				kind: SettlementType::Mint,
				chain: "c-chain".into(),
				asset_id: ASSET,
				amount,
				party: to.clone(),
			},
		)
		.await;
		f.batcher
			.process_incoming_assets("c-chain".into(), ASSET, amount, to, p)
			.await
	}

	async fn burn(f: &Fixture, amount: u64, from: Address) -> Result<Settlement, SettlementError> {
		let p = proof(
			&f.proofs,
			ProofContext {
				kind: SettlementType::Burn,
				chain: "c-chain".into(),
				asset_id: ASSET,
				amount,
				party: from.clone(),
			},
		)
		.await;
		f.batcher
			.process_outgoing_assets("c-chain".into(), ASSET, amount, from, p)
			.await
	}

	#[tokio::test]
	async fn test_five_settlements_with_batch_size_three_yield_two_transactions() {
		let f = fixture(config(3, 150));
		let mut ids = Vec::new();
		for i in 0..5 {
			ids.push(mint(&f, 10 + i, account(1)).await.unwrap().id);
		}
		tokio::time::sleep(Duration::from_millis(500)).await;

		let issued = f.chain.issued().await;
		let sizes: Vec<usize> = issued.iter().map(|(_, tx)| tx.tx.settlement_ids.len()).collect();
		assert_eq!(sizes, vec![3, 2]);
		for id in ids {
			let s = f.batcher.get_settlement(id).await.unwrap().unwrap();
			assert_eq!(s.status, SettlementStatus::Completed);
			assert!(s.tx_id.is_some());
		}
		assert_eq!(f.batcher.pending_count().await, 0);
	}

	#[tokio::test]
	async fn test_outgoing_insufficient_balance_creates_nothing() {
		let f = fixture(config(16, 1_000));
		f.chain.credit(&account(2), ASSET, 100).await;

		let err = burn(&f, 1_000, account(2)).await.unwrap_err();
		assert_eq!(err, SettlementError::InsufficientBalance { have: 100, need: 1_000 });
		assert_eq!(f.batcher.pending_count().await, 0);
	}

	#[tokio::test]
	async fn test_incoming_with_empty_transfer_proof_rejected() {
		let f = fixture(config(16, 1_000));
		let mut p = proof(
			&f.proofs,
			ProofContext {
				kind: SettlementType::Mint,
				chain: "c-chain".into(),
				asset_id: ASSET,
				amount: 5,
				party: account(1),
			},
		)
		.await;
		p.transfer_proof.clear();

		let err = f
			.batcher
			.process_incoming_assets("c-chain".into(), ASSET, 5, account(1), p)
			.await
			.unwrap_err();
		assert!(matches!(err, SettlementError::Proof(_)));
		assert_eq!(f.batcher.pending_count().await, 0);
	}

	#[tokio::test]
	async fn test_burn_spends_balance() {
		let f = fixture(config(16, 1_000));
		f.chain.credit(&account(3), ASSET, 100).await;
		let first = burn(&f, 30, account(3)).await.unwrap();
		// The queued burn is reserved against the balance.
		assert_eq!(
			burn(&f, 80, account(3)).await.unwrap_err(),
			SettlementError::InsufficientBalance { have: 70, need: 80 }
		);
		f.batcher.flush_now().await;

		let settled = f.batcher.get_settlement(first.id).await.unwrap().unwrap();
		assert_eq!(settled.status, SettlementStatus::Completed);
		assert_eq!(f.chain.get_balance(&account(3), &ASSET).await.unwrap(), 70);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn test_concurrent_burns_never_overdraw() {
		let f = Arc::new(fixture(config(64, 60_000)));
		f.chain.credit(&account(4), ASSET, 100).await;

		let mut tasks = JoinSet::new();
		for _ in 0..10 {
			let f = f.clone();
			tasks.spawn(async move { burn(&f, 30, account(4)).await });
		}
		let mut queued = 0;
		while let Some(result) = tasks.join_next().await {
			match result.unwrap() {
				Ok(_) => queued += 1,
				Err(e) => assert!(matches!(e, SettlementError::InsufficientBalance { .. })),
			}
		}
		assert_eq!(queued, 3);
		assert_eq!(f.batcher.pending_count().await, 3);
	}

	#[tokio::test]
	async fn test_failed_transaction_fails_whole_group() {
		let f = fixture(config(16, 10_000));
		let a = mint(&f, 1, account(1)).await.unwrap();
		let b = mint(&f, 2, account(2)).await.unwrap();
		f.chain.fail_next_issues(1).await;
		f.batcher.flush_now().await;

		for id in [a.id, b.id] {
			let s = f.batcher.get_settlement(id).await.unwrap().unwrap();
			assert_eq!(s.status, SettlementStatus::Failed);
			assert!(s.tx_id.is_none());
		}
		assert_eq!(f.batcher.stats().await.failed, 2);
	}

	#[tokio::test]
	async fn test_isolate_policy_resubmits_individually() {
		let mut cfg = config(16, 10_000);
		cfg.failure_policy = FailurePolicy::Isolate;
		let f = fixture(cfg);
		let a = mint(&f, 1, account(1)).await.unwrap();
		let b = mint(&f, 2, account(2)).await.unwrap();
		f.chain.fail_next_issues(1).await;
		f.batcher.flush_now().await;

		let a = f.batcher.get_settlement(a.id).await.unwrap().unwrap();
		let b = f.batcher.get_settlement(b.id).await.unwrap().unwrap();
		assert_eq!(a.status, SettlementStatus::Completed);
		assert_eq!(b.status, SettlementStatus::Completed);
		assert_ne!(a.tx_id, b.tx_id);
		assert_eq!(f.chain.issued().await.len(), 2);
	}

	#[tokio::test]
	async fn test_apply_status_is_idempotent_and_typed() {
		let f = fixture(config(16, 10_000));
		let s = mint(&f, 9, account(1)).await.unwrap();
		let tx = Id([8; 32]);

		assert!(matches!(
			f.batcher.apply_status(s.id, SettlementType::Burn, tx).await,
			Err(SettlementError::TypeMismatch { .. })
		));
		assert!(f.batcher.apply_status(s.id, SettlementType::Mint, tx).await.unwrap());
		assert!(!f.batcher.apply_status(s.id, SettlementType::Mint, tx).await.unwrap());
		assert!(matches!(
			f.batcher.fail_settlement(s.id, "late").await,
			Err(SettlementError::AlreadyFinal { .. })
		));

		// The queued copy is gone, so a flush issues nothing.
		f.batcher.flush_now().await;
		assert!(f.chain.issued().await.is_empty());
		let stored = f.batcher.get_settlement(s.id).await.unwrap().unwrap();
		assert_eq!(stored.tx_id, Some(tx));
	}
}
