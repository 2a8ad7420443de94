//! Transfer orchestrator.
//!
//! Intents are validated and classified synchronously, then dispatched to
//! their path. Settlement legs and release authorizations complete later;
//! the orchestrator's run loop listens for settlement and session events and
//! advances the waiting transfers.

use crate::bundle::{eligibility_inputs, generate_bundle};
use crate::error::{OrchestratorError, ValidationError};
use crate::pool::IntentPool;
use crate::registry::AssetRegistry;
use crate::route::{self, Dispatch, StakeParams};
use crate::validators::ValidatorNftRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use teleport_chains::ChainRegistry;
use teleport_config::{ChainsConfig, OrchestratorConfig};
use teleport_settlement::{SettlementBatcher, SettlementError};
use teleport_storage::{Namespace, StorageService};
use teleport_threshold::{SessionRequest, ThresholdSessionManager};
use teleport_types::{
	circuits, Address, ChainId, EventBus, HealthStatus, Id, IntentAuthenticator, ProofContext,
	ProofGenerator, SessionEvent, SessionId, SessionResult, SessionState, SettlementEvent,
	SettlementId, SettlementStatus, SettlementType, StakeWindow, TeleportAsset, TeleportEvent,
	TeleportIntent, TeleportTransfer, TransferEvent, TransferId, TransferStatus, ValidatorNft,
	ValidatorSet,
};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Settlement leg a transfer is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
	Mint,
	Burn,
	TransitMint,
	TransitBurn,
	/// Burn of a validator NFT leaving the settlement chain to be staked.
	StakeLock(StakeParams),
}

impl Leg {
	fn kind(&self) -> SettlementType {
		match self {
			Leg::Mint | Leg::TransitMint => SettlementType::Mint,
			Leg::Burn | Leg::TransitBurn | Leg::StakeLock(_) => SettlementType::Burn,
		}
	}
}

/// Intent id accepted once, remembered until the intent's deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ConsumedIntent {
	intent_id: Id,
	deadline: DateTime<Utc>,
}

const CONSUMED_PREFIX: &str = "intent:";

fn consumed_key(intent_id: &Id) -> String {
	format!("{}{}", CONSUMED_PREFIX, intent_id)
}

/// Funds left with the temporary holder after a transit burn leg failed.
/// Kept for manual intervention; nothing reverses the mint automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeldTransit {
	pub transfer_id: TransferId,
	pub holder: Address,
	pub asset_id: Id,
	pub amount: u64,
	pub dest_chain: ChainId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub mint_settlement: Option<SettlementId>,
	pub reason: String,
	pub held_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorStats {
	pub active_transfers: usize,
	pub completed: u64,
	pub failed: u64,
	pub refunded: u64,
	/// Sum of completed transfer amounts.
	pub volume: u64,
	pub held_transits: usize,
	pub pooled_intents: usize,
}

/// Collaborators of a [`TransferOrchestrator`].
pub struct OrchestratorDeps {
	pub chains: ChainsConfig,
	pub batcher: SettlementBatcher,
	pub sessions: ThresholdSessionManager,
	pub proofs: Arc<dyn ProofGenerator>,
	/// Tag recorded on generated proof bundles.
	pub proof_system: String,
	pub validators: Arc<dyn ValidatorSet>,
	pub authenticator: Arc<dyn IntentAuthenticator>,
	pub execution_chains: Arc<ChainRegistry>,
	pub storage: Arc<StorageService>,
	pub events: EventBus,
}

struct Inner {
	config: OrchestratorConfig,
	chains: ChainsConfig,
	batcher: SettlementBatcher,
	sessions: ThresholdSessionManager,
	proofs: Arc<dyn ProofGenerator>,
	proof_system: String,
	validators: Arc<dyn ValidatorSet>,
	authenticator: Arc<dyn IntentAuthenticator>,
	execution_chains: Arc<ChainRegistry>,
	storage: Arc<StorageService>,
	events: EventBus,
	/// Subscribed at construction so no event published before `run` is lost.
	receiver: Mutex<Option<broadcast::Receiver<TeleportEvent>>>,
	registry: AssetRegistry,
	pool: IntentPool,
	validator_nfts: ValidatorNftRegistry,
	transfers: RwLock<HashMap<TransferId, TeleportTransfer>>,
	legs: RwLock<HashMap<SettlementId, (TransferId, Leg)>>,
	authorizations: RwLock<HashMap<SessionId, TransferId>>,
	held: RwLock<HashMap<TransferId, HeldTransit>>,
	/// Consumed intent ids and their deadlines.
	consumed: RwLock<HashMap<Id, DateTime<Utc>>>,
	completed: AtomicU64,
	failed: AtomicU64,
	refunded: AtomicU64,
	volume: AtomicU64,
}

/// Validates, routes and tracks teleport transfers.
#[derive(Clone)]
pub struct TransferOrchestrator {
	inner: Arc<Inner>,
}

impl TransferOrchestrator {
	pub fn new(config: OrchestratorConfig, deps: OrchestratorDeps) -> Self {
		let receiver = deps.events.subscribe();
		Self {
			inner: Arc::new(Inner {
				pool: IntentPool::new(config.max_pool_size),
				registry: AssetRegistry::new(deps.storage.clone()),
				validator_nfts: ValidatorNftRegistry::new(deps.storage.clone()),
				config,
				chains: deps.chains,
				batcher: deps.batcher,
				sessions: deps.sessions,
				proofs: deps.proofs,
				proof_system: deps.proof_system,
				validators: deps.validators,
				authenticator: deps.authenticator,
				execution_chains: deps.execution_chains,
				storage: deps.storage,
				events: deps.events,
				receiver: Mutex::new(Some(receiver)),
				transfers: RwLock::new(HashMap::new()),
				legs: RwLock::new(HashMap::new()),
				authorizations: RwLock::new(HashMap::new()),
				held: RwLock::new(HashMap::new()),
				consumed: RwLock::new(HashMap::new()),
				completed: AtomicU64::new(0),
				failed: AtomicU64::new(0),
				refunded: AtomicU64::new(0),
				volume: AtomicU64::new(0),
			}),
		}
	}

	pub fn registry(&self) -> &AssetRegistry {
		&self.inner.registry
	}

	pub fn pool(&self) -> &IntentPool {
		&self.inner.pool
	}

	pub fn validator_nfts(&self) -> &ValidatorNftRegistry {
		&self.inner.validator_nfts
	}

	/// Loads persisted assets, validator NFTs and consumed intent ids.
	pub async fn load(&self) -> Result<(), OrchestratorError> {
		let assets = self.inner.registry.load().await?;
		let nfts = self.inner.validator_nfts.load().await?;
		let consumed = self.load_consumed().await?;
		info!(assets, validator_nfts = nfts, consumed, "Loaded orchestrator state");
		Ok(())
	}

	async fn load_consumed(&self) -> Result<usize, OrchestratorError> {
		let storage = &self.inner.storage;
		let now = Utc::now();
		let mut consumed = self.inner.consumed.write().await;
		for id in storage.list_ids(Namespace::Transfers).await? {
			if !id.starts_with(CONSUMED_PREFIX) {
				continue;
			}
			let Some(record) = storage
				.try_retrieve::<ConsumedIntent>(Namespace::Transfers, &id)
				.await?
			else {
				continue;
			};
			if record.deadline <= now {
				storage.remove(Namespace::Transfers, &id).await?;
			} else {
				consumed.insert(record.intent_id, record.deadline);
			}
		}
		Ok(consumed.len())
	}

	/// Marks `intent` consumed until its deadline. Returns false if it
	/// already was.
	async fn consume(&self, intent: &TeleportIntent) -> Result<bool, OrchestratorError> {
		{
			let mut consumed = self.inner.consumed.write().await;
			if consumed.contains_key(&intent.id) {
				return Ok(false);
			}
			consumed.insert(intent.id, intent.deadline);
		}
		let record = ConsumedIntent {
			intent_id: intent.id,
			deadline: intent.deadline,
		};
		let ttl = (intent.deadline - Utc::now()).to_std().ok();
		if let Err(e) = self
			.inner
			.storage
			.store_with_ttl(Namespace::Transfers, &consumed_key(&intent.id), &record, ttl)
			.await
		{
			self.inner.consumed.write().await.remove(&intent.id);
			return Err(e.into());
		}
		Ok(true)
	}

	async fn release_consumed(&self, intent_id: &Id) {
		self.inner.consumed.write().await.remove(intent_id);
		if let Err(e) = self
			.inner
			.storage
			.remove(Namespace::Transfers, &consumed_key(intent_id))
			.await
		{
			warn!(intent_id = %intent_id, "Failed to remove consumed intent: {}", e);
		}
	}

	/// Forgets consumed intent ids whose deadline has passed. Such intents
	/// are rejected as expired anyway. Returns how many were pruned.
	pub async fn prune_consumed(&self) -> usize {
		let now = Utc::now();
		let expired: Vec<Id> = {
			let mut consumed = self.inner.consumed.write().await;
			let expired: Vec<Id> = consumed
				.iter()
				.filter(|(_, deadline)| **deadline <= now)
				.map(|(id, _)| *id)
				.collect();
			for id in &expired {
				consumed.remove(id);
			}
			expired
		};
		for intent_id in &expired {
			if let Err(e) = self
				.inner
				.storage
				.remove(Namespace::Transfers, &consumed_key(intent_id))
				.await
			{
				debug!(intent_id = %intent_id, "Consumed intent record not removed: {}", e);
			}
		}
		expired.len()
	}

	/// Validates `intent` and dispatches it to its transfer path.
	///
	/// Validation failures create no transfer. Once dispatched, the returned
	/// transfer is `settling` (or already terminal); the final outcome is
	/// observed through [`get_transfer`](Self::get_transfer). If the path
	/// fails while dispatching, the transfer is marked failed and the error
	/// is returned.
	pub async fn process_intent(
		&self,
		intent: TeleportIntent,
	) -> Result<TeleportTransfer, OrchestratorError> {
		let inner = &self.inner;
		let (asset, dispatch) = match self.validate(&intent).await {
			Ok(resolved) => resolved,
			Err(e) => {
				debug!(intent_id = %intent.id, "Rejected intent: {}", e);
				return Err(e.into());
			},
		};

		if !self.consume(&intent).await? {
			return Err(ValidationError::Duplicate(intent.id).into());
		}
		if asset.asset_type.is_non_fungible() {
			if let Err(e) = inner.registry.reserve(&asset.id).await {
				self.release_consumed(&intent.id).await;
				return Err(e);
			}
		}

		let transfer = TeleportTransfer::new(intent, dispatch.route(), asset);
		let transfer_id = transfer.id;
		info!(
			transfer_id = %transfer_id,
			intent_id = %transfer.intent.id,
			route = %transfer.route,
			amount = transfer.intent.amount,
			"Accepted {} -> {} transfer", transfer.source_chain, transfer.dest_chain
		);
		inner.transfers.write().await.insert(transfer_id, transfer.clone());
		self.persist(&transfer).await;
		self.publish_status(&transfer);

		if let Err(e) = self.dispatch(transfer_id, dispatch).await {
			self.fail_transfer(transfer_id, e.to_string()).await;
			return Err(e);
		}
		self.get_transfer(transfer_id)
			.await?
			.ok_or(OrchestratorError::NotFound(transfer_id))
	}

	async fn validate(
		&self,
		intent: &TeleportIntent,
	) -> Result<(TeleportAsset, Dispatch), ValidationError> {
		let inner = &self.inner;
		if intent.is_expired(Utc::now()) {
			return Err(ValidationError::Expired(intent.id));
		}
		if intent.amount == 0 {
			return Err(ValidationError::ZeroAmount);
		}
		if !inner.authenticator.authenticate(intent) {
			return Err(ValidationError::InvalidSignature);
		}
		let asset_id = intent.source_asset.asset_id;
		let asset = inner
			.registry
			.get(&asset_id)
			.ok_or(ValidationError::UnknownAsset(asset_id))?;

		let (source, dest) = (intent.source_chain(), intent.dest_chain());
		for chain in [source, dest] {
			if !inner.chains.is_known(chain) {
				return Err(ValidationError::UnknownChain(chain.clone()));
			}
		}
		if source == dest {
			return Err(ValidationError::SameChain(source.clone()));
		}

		let dispatch = route::resolve(intent, &asset, &inner.chains)?;

		if asset.asset_type.is_non_fungible() {
			if &asset.current_chain != source {
				return Err(ValidationError::WrongLocation {
					asset_id,
					expected: source.clone(),
					actual: asset.current_chain.clone(),
				});
			}
			if intent.amount != 1 {
				return Err(ValidationError::NonFungibleAmount(intent.amount));
			}
		}
		if let (Dispatch::Transit, Some(limit)) = (&dispatch, inner.config.transit_risk_limit) {
			if intent.amount > limit {
				return Err(ValidationError::TransitRiskLimit {
					amount: intent.amount,
					limit,
				});
			}
		}
		if inner.consumed.read().await.contains_key(&intent.id) {
			return Err(ValidationError::Duplicate(intent.id));
		}
		Ok((asset, dispatch))
	}

	async fn dispatch(
		&self,
		transfer_id: TransferId,
		dispatch: Dispatch,
	) -> Result<(), OrchestratorError> {
		let transfer = self
			.set_status(transfer_id, TransferStatus::Executing)
			.await?;
		match dispatch {
			Dispatch::Mint => self.start_leg(&transfer, Leg::Mint).await,
			Dispatch::Burn => self.start_leg(&transfer, Leg::Burn).await,
			Dispatch::Transit => self.start_leg(&transfer, Leg::TransitMint).await,
			Dispatch::Stake(params) => self.stake(&transfer, params).await,
		}
	}

	/// Queues the settlement for `leg` and records it on the transfer.
	///
	/// The outcome arrives as a settlement event. If it was published before
	/// the leg was recorded, the next reconcile pass picks it up.
	async fn start_leg(&self, transfer: &TeleportTransfer, leg: Leg) -> Result<(), OrchestratorError> {
		let inner = &self.inner;
		let transfer_id = transfer.id;
		let asset_id = transfer.asset.id;
		let amount = transfer.intent.amount;
		let holder = inner.chains.temporary_holder.clone();
		let (chain, party) = match leg {
			Leg::Mint => (transfer.source_chain.clone(), transfer.intent.recipient.clone()),
			Leg::Burn => (transfer.dest_chain.clone(), transfer.intent.sender.clone()),
			Leg::TransitMint => (transfer.source_chain.clone(), holder),
			Leg::TransitBurn => (transfer.dest_chain.clone(), holder),
			Leg::StakeLock(_) => (transfer.dest_chain.clone(), transfer.intent.sender.clone()),
		};
		let context = ProofContext {
			kind: leg.kind(),
			chain: chain.clone(),
			asset_id,
			amount,
			party: party.clone(),
		};
		let proof = generate_bundle(inner.proofs.as_ref(), &inner.proof_system, &context)
			.await
			.map_err(|source| OrchestratorError::Proof {
				transfer_id,
				source,
			})?;

		let queued = match leg.kind() {
			SettlementType::Mint => {
				inner
					.batcher
					.process_incoming_assets(chain, asset_id, amount, party, proof)
					.await
			},
			SettlementType::Burn => {
				inner
					.batcher
					.process_outgoing_assets(chain, asset_id, amount, party, proof)
					.await
			},
		};
		let settlement = queued.map_err(|source| OrchestratorError::Settlement {
			transfer_id,
			source,
		})?;

		let settlement_id = settlement.id;
		self.update(transfer_id, |t| {
			if t.status == TransferStatus::Executing {
				t.transition(TransferStatus::Settling)?;
			}
			t.settlement_ids.push(settlement_id);
			Ok(())
		})
		.await?;
		inner
			.legs
			.write()
			.await
			.insert(settlement_id, (transfer_id, leg));
		debug!(
			transfer_id = %transfer_id,
			settlement_id = %settlement_id,
			"Waiting on {:?} settlement leg", leg
		);
		Ok(())
	}

	/// Locks a validator NFT, proves eligibility and binds it to its node.
	/// The NFT was reserved when the intent was accepted.
	///
	/// An NFT leaving the settlement chain is burned there first and only
	/// registered once that settlement completes. NFTs on execution chains
	/// stay reserved in the registry as their lock.
	async fn stake(
		&self,
		transfer: &TeleportTransfer,
		params: StakeParams,
	) -> Result<(), OrchestratorError> {
		if transfer.source_chain == self.inner.chains.settlement_chain {
			return self.start_leg(transfer, Leg::StakeLock(params)).await;
		}
		self.register_stake(transfer, params).await
	}

	/// Registers a staked NFT once its lock settled.
	async fn finish_stake(&self, transfer_id: TransferId, params: StakeParams) {
		let Some(transfer) = self.active_transfer(transfer_id).await else {
			return;
		};
		if let Err(e) = self.register_stake(&transfer, params).await {
			self.fail_transfer(transfer_id, e.to_string()).await;
		}
	}

	async fn register_stake(
		&self,
		transfer: &TeleportTransfer,
		params: StakeParams,
	) -> Result<(), OrchestratorError> {
		let inner = &self.inner;
		let transfer_id = transfer.id;
		let nft_asset_id = transfer.asset.id;

		let height = match inner.execution_chains.get(&inner.chains.staking_chain) {
			Some(client) => client
				.get_height()
				.await
				.map_err(|source| OrchestratorError::Chain {
					transfer_id,
					source,
				})?,
			None => 0,
		};
		let inputs = eligibility_inputs(&nft_asset_id, &params.node_id, params.stake_amount, height);
		let proof = inner
			.proofs
			.generate_proof(circuits::VALIDATOR_ELIGIBILITY, &inputs)
			.await
			.map_err(|source| OrchestratorError::Proof {
				transfer_id,
				source,
			})?;
		self.update(transfer_id, |t| {
			if t.status == TransferStatus::Executing {
				t.transition(TransferStatus::Settling)?;
			}
			t.authorization = Some(hex::encode(&proof));
			Ok(())
		})
		.await?;

		let nft = ValidatorNft {
			nft_asset_id,
			node_id: params.node_id,
			owner: transfer.intent.sender.clone(),
			stake_amount: params.stake_amount,
			stake_start: params.window.start,
			stake_end: params.window.end,
			delegation_fee: params.delegation_fee,
			active: true,
		};
		self.stake_validator_nft(nft).await.map_err(|e| match e {
			OrchestratorError::ValidatorSet(source) => OrchestratorError::Chain {
				transfer_id,
				source,
			},
			other => other,
		})?;
		self.complete(transfer_id).await;
		Ok(())
	}

	/// Adds a validator NFT to the validator set and records it.
	pub async fn stake_validator_nft(&self, nft: ValidatorNft) -> Result<(), OrchestratorError> {
		let inner = &self.inner;
		if inner
			.validator_nfts
			.get(&nft.nft_asset_id)
			.is_some_and(|n| n.active)
		{
			return Err(OrchestratorError::ValidatorNftStaked(nft.nft_asset_id));
		}
		let window = StakeWindow {
			start: nft.stake_start,
			end: nft.stake_end,
		};
		inner
			.validators
			.add_nft_validator(nft.node_id, nft.nft_asset_id, nft.stake_amount, window)
			.await?;
		if let Err(e) = inner.validator_nfts.register(nft.clone()).await {
			if let Err(undo) = inner
				.validators
				.remove_nft_validator(nft.node_id, nft.nft_asset_id)
				.await
			{
				warn!(nft_asset_id = %nft.nft_asset_id, "Failed to undo NFT validator: {}", undo);
			}
			return Err(e);
		}
		Ok(())
	}

	/// Deactivates a staked NFT and removes its validator. Unstaking an
	/// inactive NFT is a no-op.
	pub async fn unstake_validator_nft(
		&self,
		nft_asset_id: &Id,
	) -> Result<ValidatorNft, OrchestratorError> {
		let inner = &self.inner;
		let nft = inner
			.validator_nfts
			.get(nft_asset_id)
			.ok_or(OrchestratorError::UnknownValidatorNft(*nft_asset_id))?;
		if !nft.active {
			return Ok(nft);
		}
		inner
			.validators
			.remove_nft_validator(nft.node_id, nft.nft_asset_id)
			.await?;
		let nft = inner.validator_nfts.deactivate(nft_asset_id).await?;
		info!(nft_asset_id = %nft_asset_id, node_id = ?nft.node_id, "Unstaked validator NFT");
		Ok(nft)
	}

	async fn on_settlement_outcome(
		&self,
		settlement_id: SettlementId,
		status: SettlementStatus,
		error: Option<String>,
	) {
		let Some((transfer_id, leg)) = self.inner.legs.write().await.remove(&settlement_id) else {
			return;
		};
		if status == SettlementStatus::Completed {
			info!(transfer_id = %transfer_id, settlement_id = %settlement_id, "{:?} leg settled", leg);
			match leg {
				Leg::Mint => self.complete(transfer_id).await,
				Leg::Burn | Leg::TransitBurn => self.request_authorization(transfer_id).await,
				Leg::TransitMint => self.continue_transit(transfer_id).await,
				Leg::StakeLock(params) => self.finish_stake(transfer_id, params).await,
			}
			return;
		}

		let reason = error.unwrap_or_else(|| status.to_string());
		match leg {
			Leg::TransitBurn => self.hold_transit(transfer_id, reason).await,
			_ => {
				self.fail_transfer(
					transfer_id,
					format!("settlement {} failed: {}", settlement_id, reason),
				)
				.await
			},
		}
	}

	/// Starts the burn leg of a transit once its mint leg settled.
	async fn continue_transit(&self, transfer_id: TransferId) {
		let Some(transfer) = self.active_transfer(transfer_id).await else {
			return;
		};
		if let Err(e) = self.start_leg(&transfer, Leg::TransitBurn).await {
			self.hold_transit(transfer_id, e.to_string()).await;
		}
	}

	/// Requests a threshold signature releasing the asset on the destination chain.
	async fn request_authorization(&self, transfer_id: TransferId) {
		let Some(transfer) = self.active_transfer(transfer_id).await else {
			return;
		};
		let sessions = &self.inner.sessions;
		let request = SessionRequest::Sign {
			key_id: sessions.signing_key_id(),
			message: release_message(&transfer),
		};
		match sessions.start_session(request).await {
			Ok(session_id) => {
				let recorded = self
					.update(transfer_id, |t| {
						t.session_ids.push(session_id);
						Ok(())
					})
					.await;
				if recorded.is_ok() {
					self.inner
						.authorizations
						.write()
						.await
						.insert(session_id, transfer_id);
					debug!(
						transfer_id = %transfer_id,
						session_id = %session_id,
						"Requested release authorization"
					);
				}
			},
			Err(source) => {
				let e = OrchestratorError::Threshold {
					transfer_id,
					source,
				};
				self.fail_transfer(transfer_id, e.to_string()).await;
			},
		}
	}

	async fn on_session_finished(&self, session_id: SessionId) {
		let Some(transfer_id) = self.inner.authorizations.write().await.remove(&session_id) else {
			return;
		};
		match self.inner.sessions.get_result(session_id).await {
			Ok((Some(SessionResult::Signature { signature, .. }), SessionState::Completed)) => {
				let recorded = self
					.update(transfer_id, |t| {
						t.authorization = Some(hex::encode(&signature));
						Ok(())
					})
					.await;
				if recorded.is_ok() {
					self.complete(transfer_id).await;
				}
			},
			Ok((_, state)) => {
				self.fail_transfer(
					transfer_id,
					format!("release authorization session {} ended {}", session_id, state),
				)
				.await
			},
			Err(source) => {
				let e = OrchestratorError::Threshold {
					transfer_id,
					source,
				};
				self.fail_transfer(transfer_id, e.to_string()).await
			},
		}
	}

	async fn complete(&self, transfer_id: TransferId) {
		let transfer = match self.set_status(transfer_id, TransferStatus::Completed).await {
			Ok(transfer) => transfer,
			Err(e) => {
				warn!(transfer_id = %transfer_id, "Cannot complete transfer: {}", e);
				return;
			},
		};
		if transfer.asset.asset_type.is_non_fungible() {
			if let Err(e) = self
				.inner
				.registry
				.relocate(&transfer.asset.id, transfer.dest_chain.clone())
				.await
			{
				warn!(transfer_id = %transfer_id, "Failed to relocate asset: {}", e);
			}
		}
		self.inner.completed.fetch_add(1, Ordering::Relaxed);
		self.inner
			.volume
			.fetch_add(transfer.intent.amount, Ordering::Relaxed);
	}

	async fn fail_transfer(&self, transfer_id: TransferId, reason: String) {
		self.finish_failed(transfer_id, reason, true).await;
	}

	/// Parks transit funds with the temporary holder and fails the transfer.
	async fn hold_transit(&self, transfer_id: TransferId, reason: String) {
		let Some(transfer) = self.active_transfer(transfer_id).await else {
			return;
		};
		let held = HeldTransit {
			transfer_id,
			holder: self.inner.chains.temporary_holder.clone(),
			asset_id: transfer.asset.id,
			amount: transfer.intent.amount,
			dest_chain: transfer.dest_chain.clone(),
			mint_settlement: transfer.settlement_ids.first().copied(),
			reason: reason.clone(),
			held_at: Utc::now(),
		};
		if let Err(e) = self
			.inner
			.storage
			.store(Namespace::Transfers, &format!("held:{}", transfer_id), &held)
			.await
		{
			warn!(transfer_id = %transfer_id, "Failed to persist held transit: {}", e);
		}
		warn!(
			transfer_id = %transfer_id,
			holder = %held.holder,
			amount = held.amount,
			"Transit burn leg failed, funds held by temporary holder: {}", reason
		);
		let message = format!("funds held by temporary holder {}: {}", held.holder, reason);
		self.inner.held.write().await.insert(transfer_id, held);
		// A held non-fungible asset stays reserved until someone resolves it.
		self.finish_failed(transfer_id, message, false).await;
	}

	async fn finish_failed(&self, transfer_id: TransferId, reason: String, release: bool) {
		let result = self
			.update(transfer_id, |t| {
				t.fail(reason.clone())?;
				Ok(())
			})
			.await;
		let transfer = match result {
			Ok(transfer) => transfer,
			Err(e) => {
				debug!(transfer_id = %transfer_id, "Not failing transfer: {}", e);
				return;
			},
		};
		warn!(transfer_id = %transfer_id, "Transfer failed: {}", reason);
		self.inner.failed.fetch_add(1, Ordering::Relaxed);
		self.cleanup_pending(transfer_id).await;
		if release && transfer.asset.asset_type.is_non_fungible() {
			if let Err(e) = self.inner.registry.release(&transfer.asset.id).await {
				warn!(transfer_id = %transfer_id, "Failed to release asset: {}", e);
			}
		}
	}

	/// Refunds a settling transfer, as recorded in an accepted block.
	/// Its settlements that have not finished are failed so they never
	/// reach the chain. Returns false if it was already refunded.
	pub async fn refund(&self, transfer_id: TransferId, reason: &str) -> Result<bool, OrchestratorError> {
		let current = self
			.get_transfer(transfer_id)
			.await?
			.ok_or(OrchestratorError::NotFound(transfer_id))?;
		if current.status == TransferStatus::Refunded {
			return Ok(false);
		}
		let transfer = self
			.update(transfer_id, |t| {
				t.transition(TransferStatus::Refunded)?;
				t.error = Some(reason.to_string());
				Ok(())
			})
			.await?;
		self.cleanup_pending(transfer_id).await;
		let cancel = format!("transfer {} refunded: {}", transfer_id, reason);
		for settlement_id in &transfer.settlement_ids {
			match self.inner.batcher.fail_settlement(*settlement_id, &cancel).await {
				Ok(_) => {},
				Err(SettlementError::AlreadyFinal { status, .. }) => {
					debug!(settlement_id = %settlement_id, "Refunded settlement already {}", status)
				},
				Err(source) => {
					return Err(OrchestratorError::Settlement {
						transfer_id,
						source,
					})
				},
			}
		}
		if transfer.asset.asset_type.is_non_fungible() {
			self.inner.registry.release(&transfer.asset.id).await?;
		}
		self.inner.refunded.fetch_add(1, Ordering::Relaxed);
		info!(transfer_id = %transfer_id, "Transfer refunded: {}", reason);
		Ok(true)
	}

	/// Forgets the legs and authorizations of a finished transfer and aborts
	/// its running sessions.
	async fn cleanup_pending(&self, transfer_id: TransferId) {
		self.inner
			.legs
			.write()
			.await
			.retain(|_, (owner, _)| *owner != transfer_id);
		let sessions: Vec<SessionId> = {
			let mut authorizations = self.inner.authorizations.write().await;
			let ids: Vec<SessionId> = authorizations
				.iter()
				.filter(|(_, owner)| **owner == transfer_id)
				.map(|(session_id, _)| *session_id)
				.collect();
			for id in &ids {
				authorizations.remove(id);
			}
			ids
		};
		for session_id in sessions {
			if let Err(e) = self.inner.sessions.cleanup_session(session_id).await {
				debug!(session_id = %session_id, "Session cleanup skipped: {}", e);
			}
		}
	}

	async fn handle_event(&self, event: TeleportEvent) {
		match event {
			TeleportEvent::Settlement(SettlementEvent::Completed { settlement_id, .. }) => {
				self.on_settlement_outcome(settlement_id, SettlementStatus::Completed, None)
					.await
			},
			TeleportEvent::Settlement(SettlementEvent::Failed {
				settlement_id,
				error,
			}) => {
				self.on_settlement_outcome(settlement_id, SettlementStatus::Failed, Some(error))
					.await
			},
			TeleportEvent::Session(
				SessionEvent::Completed { session_id }
				| SessionEvent::Failed { session_id, .. }
				| SessionEvent::Expired { session_id },
			) => self.on_session_finished(session_id).await,
			_ => {},
		}
	}

	/// Re-checks every pending leg and authorization against its owner, for
	/// outcomes whose events were missed.
	pub async fn reconcile(&self) {
		let legs: Vec<SettlementId> = self.inner.legs.read().await.keys().copied().collect();
		for settlement_id in legs {
			match self.inner.batcher.get_settlement(settlement_id).await {
				Ok(Some(settlement)) if settlement.status.is_terminal() => {
					self.on_settlement_outcome(settlement_id, settlement.status, settlement.error)
						.await
				},
				Ok(_) => {},
				Err(e) => warn!(settlement_id = %settlement_id, "Settlement lookup failed: {}", e),
			}
		}

		let sessions: Vec<SessionId> = self
			.inner
			.authorizations
			.read()
			.await
			.keys()
			.copied()
			.collect();
		for session_id in sessions {
			let finished = self
				.inner
				.sessions
				.session(session_id)
				.await
				.map_or(true, |info| info.state.is_terminal());
			if finished {
				self.on_session_finished(session_id).await;
			}
		}
	}

	/// Dispatches intents of accepted blocks. Returns how many were accepted.
	pub async fn sweep_pool(&self) -> usize {
		let mut dispatched = 0;
		for intent in self.inner.pool.take_ready().await {
			let intent_id = intent.id;
			match self.process_intent(intent).await {
				Ok(_) => dispatched += 1,
				Err(e) => warn!(intent_id = %intent_id, "Pooled intent not dispatched: {}", e),
			}
		}
		dispatched
	}

	/// Drops terminal transfers older than the retention window from memory.
	/// They stay in storage. Returns how many were purged.
	pub async fn purge_terminal(&self) -> usize {
		let retention = self.inner.config.retention();
		let now = Utc::now();
		let mut transfers = self.inner.transfers.write().await;
		let before = transfers.len();
		transfers.retain(|_, t| {
			let expired = t.status.is_terminal()
				&& t.completed_at
					.and_then(|at| (now - at).to_std().ok())
					.is_some_and(|age| age > retention);
			!expired
		});
		before - transfers.len()
	}

	/// Event-driven continuation plus the periodic pool sweep and purge.
	pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), OrchestratorError> {
		let mut events = match self.inner.receiver.lock().await.take() {
			Some(receiver) => receiver,
			None => self.inner.events.subscribe(),
		};
		let mut interval = tokio::time::interval(self.inner.config.sweep_interval());

		loop {
			tokio::select! {
				received = events.recv() => match received {
					Ok(event) => self.handle_event(event).await,
					Err(broadcast::error::RecvError::Lagged(skipped)) => {
						warn!("Orchestrator missed {} events, reconciling", skipped);
						self.reconcile().await;
					}
					Err(broadcast::error::RecvError::Closed) => break,
				},
				_ = interval.tick() => {
					let dispatched = self.sweep_pool().await;
					let purged = self.purge_terminal().await;
					let pruned = self.prune_consumed().await;
					self.reconcile().await;
					if dispatched > 0 || purged > 0 || pruned > 0 {
						debug!(dispatched, purged, pruned, "Orchestrator sweep");
					}
				}
				_ = shutdown.recv() => {
					info!("Transfer orchestrator shutting down");
					break;
				}
			}
		}
		Ok(())
	}

	/// Looks a transfer up in memory, then storage.
	pub async fn get_transfer(
		&self,
		transfer_id: TransferId,
	) -> Result<Option<TeleportTransfer>, OrchestratorError> {
		if let Some(t) = self.inner.transfers.read().await.get(&transfer_id) {
			return Ok(Some(t.clone()));
		}
		Ok(self
			.inner
			.storage
			.try_retrieve(Namespace::Transfers, &transfer_id.to_string())
			.await?)
	}

	pub async fn active_transfers(&self) -> Vec<TeleportTransfer> {
		self.inner
			.transfers
			.read()
			.await
			.values()
			.filter(|t| !t.status.is_terminal())
			.cloned()
			.collect()
	}

	pub async fn held_transits(&self) -> Vec<HeldTransit> {
		self.inner.held.read().await.values().cloned().collect()
	}

	pub async fn health_status(&self) -> HealthStatus {
		let active = self.active_count().await;
		let config = &self.inner.config;
		if active >= config.overload_threshold {
			HealthStatus::Overloaded
		} else if active >= config.busy_threshold {
			HealthStatus::Busy
		} else {
			HealthStatus::Healthy
		}
	}

	pub async fn stats(&self) -> OrchestratorStats {
		OrchestratorStats {
			active_transfers: self.active_count().await,
			completed: self.inner.completed.load(Ordering::Relaxed),
			failed: self.inner.failed.load(Ordering::Relaxed),
			refunded: self.inner.refunded.load(Ordering::Relaxed),
			volume: self.inner.volume.load(Ordering::Relaxed),
			held_transits: self.inner.held.read().await.len(),
			pooled_intents: self.inner.pool.len().await,
		}
	}

	async fn active_count(&self) -> usize {
		self.inner
			.transfers
			.read()
			.await
			.values()
			.filter(|t| !t.status.is_terminal())
			.count()
	}

	async fn active_transfer(&self, transfer_id: TransferId) -> Option<TeleportTransfer> {
		self.inner
			.transfers
			.read()
			.await
			.get(&transfer_id)
			.filter(|t| !t.status.is_terminal())
			.cloned()
	}

	async fn set_status(
		&self,
		transfer_id: TransferId,
		status: TransferStatus,
	) -> Result<TeleportTransfer, OrchestratorError> {
		self.update(transfer_id, |t| {
			t.transition(status)?;
			Ok(())
		})
		.await
	}

	/// Applies `apply` to the in-memory transfer, then persists it and
	/// announces status changes. Nothing is written if `apply` fails.
	async fn update<F>(
		&self,
		transfer_id: TransferId,
		apply: F,
	) -> Result<TeleportTransfer, OrchestratorError>
	where
		F: FnOnce(&mut TeleportTransfer) -> Result<(), OrchestratorError>,
	{
		let (transfer, previous) = {
			let mut transfers = self.inner.transfers.write().await;
			let transfer = transfers
				.get_mut(&transfer_id)
				.ok_or(OrchestratorError::NotFound(transfer_id))?;
			let previous = transfer.status;
			apply(transfer)?;
			(transfer.clone(), previous)
		};
		self.persist(&transfer).await;
		if transfer.status != previous {
			info!(transfer_id = %transfer_id, "Transfer {} -> {}", previous, transfer.status);
			self.publish_status(&transfer);
		}
		Ok(transfer)
	}

	async fn persist(&self, transfer: &TeleportTransfer) {
		if let Err(e) = self
			.inner
			.storage
			.store(Namespace::Transfers, &transfer.id.to_string(), transfer)
			.await
		{
			warn!(transfer_id = %transfer.id, "Failed to persist transfer: {}", e);
		}
	}

	fn publish_status(&self, transfer: &TeleportTransfer) {
		self.inner
			.events
			.publish(TeleportEvent::Transfer(TransferEvent::StatusChanged {
				transfer_id: transfer.id,
				status: transfer.status,
			}))
			.ok();
	}
}

/// Message the validator group signs to release a transfer on its destination.
fn release_message(transfer: &TeleportTransfer) -> Vec<u8> {
	let intent = &transfer.intent;
	let chain = transfer.dest_chain.as_str().as_bytes();
	let mut buf = Vec::with_capacity(128 + 16 * transfer.settlement_ids.len());
	buf.extend_from_slice(b"teleport/release");
	buf.extend_from_slice(transfer.id.as_bytes());
	buf.extend_from_slice(&(chain.len() as u32).to_be_bytes());
	buf.extend_from_slice(chain);
	buf.extend_from_slice(intent.dest_asset.asset_id.as_bytes());
	buf.extend_from_slice(&intent.amount.to_be_bytes());
	buf.extend_from_slice(&(intent.recipient.as_bytes().len() as u32).to_be_bytes());
	buf.extend_from_slice(intent.recipient.as_bytes());
	for settlement_id in &transfer.settlement_ids {
		buf.extend_from_slice(settlement_id.as_bytes());
	}
	buf
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::auth::{sender_address, sign_intent, Ed25519IntentAuthenticator};
	use crate::route::stake_keys;
	use ed25519_dalek::SigningKey;
	use rand::rngs::OsRng;
	use std::collections::BTreeMap;
	use std::time::Duration;
	use teleport_chains::{
		DigestProofSystem, InMemoryValidatorSet, LocalExecutionChain, LocalSettlementChain,
		PROOF_SYSTEM,
	};
	use teleport_config::{SettlementConfig, ThresholdConfig};
	use teleport_threshold::{InMemoryTransport, ThresholdSigner};
	use teleport_types::{AssetIdentifier, AssetType, IntentType, NodeId, TransferRoute};

	const TOKEN: Id = Id([5; 32]);
	const NFT: Id = Id([6; 32]);
	const VALIDATOR_NFT: Id = Id([7; 32]);

	struct Fixture {
		orchestrator: TransferOrchestrator,
		batcher: SettlementBatcher,
		chain: Arc<LocalSettlementChain>,
		validators: Arc<InMemoryValidatorSet>,
		key: SigningKey,
		shutdown: broadcast::Sender<()>,
	}

	impl Drop for Fixture {
		fn drop(&mut self) {
			self.shutdown.send(()).ok();
		}
	}

	fn chains() -> ChainsConfig {
		ChainsConfig {
			settlement_chain: "x-chain".into(),
			staking_chain: "p-chain".into(),
			execution_chains: vec!["c-chain".into(), "d-chain".into()],
			temporary_holder: Address(vec![0xee; 20]),
		}
	}

	fn asset(id: Id, asset_type: AssetType, chain: &str) -> TeleportAsset {
		TeleportAsset {
			id,
			asset_type,
			symbol: "TKN".into(),
			origin_chain: chain.into(),
			current_chain: chain.into(),
			in_flight: false,
		}
	}

	async fn fixture(config: OrchestratorConfig) -> Fixture {
		let storage = Arc::new(StorageService::in_memory());
		let events = EventBus::new(256);
		let sessions = ThresholdSessionManager::new(
			ThresholdConfig {
				participants: (1..=4).map(|i| NodeId([i; 20])).collect(),
				local_parties: Vec::new(),
				threshold: 3,
				signing_key_id: Id([9; 32]),
				round_timeout_ms: 500,
				session_timeout_secs: 5,
				sign_timeout_ms: 5_000,
				max_concurrent_sessions: 8,
				sweep_interval_ms: 50,
			},
			storage.clone(),
			Arc::new(InMemoryTransport::new()),
			events.clone(),
		);
		let cfg = sessions.config().clone();
		let keygen = sessions
			.start_session(SessionRequest::KeyGen {
				key_id: cfg.signing_key_id,
				participants: cfg.participants.clone(),
				threshold: cfg.threshold,
			})
			.await
			.unwrap();
		for _ in 0..300 {
			let (_, state) = sessions.get_result(keygen).await.unwrap();
			if state.is_terminal() {
				assert_eq!(state, SessionState::Completed);
				break;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}

		let chain = Arc::new(LocalSettlementChain::new("x-chain".into()));
		let batcher = SettlementBatcher::new(
			SettlementConfig {
				batch_size: 100,
				batch_interval_ms: 60_000,
				..SettlementConfig::default()
			},
			chain.clone(),
			Arc::new(DigestProofSystem::new()),
			Arc::new(ThresholdSigner::new(sessions.clone(), cfg.signing_key_id)),
			storage.clone(),
			events.clone(),
		);
		let validators = Arc::new(InMemoryValidatorSet::new());
		let mut execution = ChainRegistry::new();
		execution
			.register(Arc::new(LocalExecutionChain::new("p-chain".into())))
			.unwrap();

		let orchestrator = TransferOrchestrator::new(
			config,
			OrchestratorDeps {
				chains: chains(),
				batcher: batcher.clone(),
				sessions,
				proofs: Arc::new(DigestProofSystem::new()),
				proof_system: PROOF_SYSTEM.to_string(),
				validators: validators.clone(),
				authenticator: Arc::new(Ed25519IntentAuthenticator),
				execution_chains: Arc::new(execution),
				storage,
				events,
			},
		);
		let registry = orchestrator.registry();
		registry
			.register(asset(TOKEN, AssetType::Fungible, "c-chain"))
			.await
			.unwrap();
		registry
			.register(asset(NFT, AssetType::Nft, "c-chain"))
			.await
			.unwrap();
		registry
			.register(asset(VALIDATOR_NFT, AssetType::ValidatorNft, "c-chain"))
			.await
			.unwrap();

		let (shutdown, _) = broadcast::channel(1);
		let runner = orchestrator.clone();
		let rx = shutdown.subscribe();
		tokio::spawn(async move { runner.run(rx).await });

		Fixture {
			orchestrator,
			batcher,
			chain,
			validators,
			key: SigningKey::generate(&mut OsRng),
			shutdown,
		}
	}

	fn intent(f: &Fixture, asset_id: Id, source: &str, dest: &str, amount: u64) -> TeleportIntent {
		let mut intent = TeleportIntent {
			id: Id::random(),
			intent_type: IntentType::Transfer,
			source_asset: AssetIdentifier::new(source.into(), asset_id),
			dest_asset: AssetIdentifier::new(dest.into(), asset_id),
			amount,
			sender: sender_address(&f.key),
			recipient: Address(vec![4; 20]),
			deadline: Utc::now() + chrono::Duration::minutes(5),
			signature: Vec::new(),
			metadata: BTreeMap::new(),
		};
		sign_intent(&f.key, &mut intent);
		intent
	}

	async fn wait_for<P>(f: &Fixture, id: TransferId, done: P) -> TeleportTransfer
	where
		P: Fn(&TeleportTransfer) -> bool,
	{
		for _ in 0..500 {
			let transfer = f.orchestrator.get_transfer(id).await.unwrap().unwrap();
			if done(&transfer) {
				return transfer;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		panic!("transfer {} did not reach the expected state", id);
	}

	#[tokio::test]
	async fn test_rejected_intents_create_no_transfer() {
		let f = fixture(OrchestratorConfig::default()).await;

		let zero = intent(&f, TOKEN, "c-chain", "x-chain", 0);
		let err = f.orchestrator.process_intent(zero).await.unwrap_err();
		assert!(matches!(err, OrchestratorError::Validation(ValidationError::ZeroAmount)));

		let mut expired = intent(&f, TOKEN, "c-chain", "x-chain", 10);
		expired.deadline = Utc::now() - chrono::Duration::seconds(1);
		sign_intent(&f.key, &mut expired);
		let err = f.orchestrator.process_intent(expired).await.unwrap_err();
		assert!(matches!(err, OrchestratorError::Validation(ValidationError::Expired(_))));

		let mut forged = intent(&f, TOKEN, "c-chain", "x-chain", 10);
		forged.amount = 11;
		let err = f.orchestrator.process_intent(forged).await.unwrap_err();
		assert!(matches!(
			err,
			OrchestratorError::Validation(ValidationError::InvalidSignature)
		));

		let same = intent(&f, TOKEN, "c-chain", "c-chain", 10);
		assert!(f.orchestrator.process_intent(same).await.is_err());

		let unknown = intent(&f, TOKEN, "c-chain", "z-chain", 10);
		assert!(f.orchestrator.process_intent(unknown).await.is_err());

		assert!(f.orchestrator.active_transfers().await.is_empty());
		assert_eq!(f.orchestrator.stats().await.failed, 0);
	}

	#[tokio::test]
	async fn test_stake_requires_validator_nft() {
		let f = fixture(OrchestratorConfig::default()).await;
		let err = f
			.orchestrator
			.process_intent(intent(&f, TOKEN, "c-chain", "p-chain", 10))
			.await
			.unwrap_err();
		assert!(err
			.to_string()
			.contains("only validator NFTs can be transferred to the staking chain"));
		assert!(f.orchestrator.active_transfers().await.is_empty());
	}

	#[tokio::test]
	async fn test_mint_path_completes_after_settlement() {
		let f = fixture(OrchestratorConfig::default()).await;
		let transfer = f
			.orchestrator
			.process_intent(intent(&f, TOKEN, "c-chain", "x-chain", 25))
			.await
			.unwrap();
		assert_eq!(transfer.route, TransferRoute::Mint);
		assert_eq!(transfer.status, TransferStatus::Settling);
		assert_eq!(transfer.settlement_ids.len(), 1);

		f.batcher.flush_now().await;
		let done = wait_for(&f, transfer.id, |t| t.status.is_terminal()).await;
		assert_eq!(done.status, TransferStatus::Completed);
		assert!(done.completed_at.is_some());

		let stats = f.orchestrator.stats().await;
		assert_eq!(stats.completed, 1);
		assert_eq!(stats.volume, 25);
	}

	#[tokio::test]
	async fn test_burn_path_records_release_authorization() {
		let f = fixture(OrchestratorConfig::default()).await;
		f.chain.credit(&sender_address(&f.key), TOKEN, 100).await;

		let transfer = f
			.orchestrator
			.process_intent(intent(&f, TOKEN, "x-chain", "c-chain", 40))
			.await
			.unwrap();
		assert_eq!(transfer.route, TransferRoute::Burn);

		f.batcher.flush_now().await;
		let done = wait_for(&f, transfer.id, |t| t.status.is_terminal()).await;
		assert_eq!(done.status, TransferStatus::Completed, "{:?}", done.error);
		assert_eq!(done.session_ids.len(), 1);
		let authorization = hex::decode(done.authorization.unwrap()).unwrap();
		assert_eq!(authorization.len(), 64);
	}

	#[tokio::test]
	async fn test_burn_without_balance_fails_transfer() {
		let f = fixture(OrchestratorConfig::default()).await;
		let i = intent(&f, TOKEN, "x-chain", "c-chain", 40);
		let intent_id = i.id;
		let err = f.orchestrator.process_intent(i).await.unwrap_err();
		assert!(matches!(err, OrchestratorError::Settlement { .. }));
		assert_eq!(f.orchestrator.stats().await.failed, 1);

		// The intent is consumed even though its transfer failed.
		let mut replay = intent(&f, TOKEN, "x-chain", "c-chain", 40);
		replay.id = intent_id;
		sign_intent(&f.key, &mut replay);
		let err = f.orchestrator.process_intent(replay).await.unwrap_err();
		assert!(matches!(
			err,
			OrchestratorError::Validation(ValidationError::Duplicate(_))
		));
	}

	#[tokio::test]
	async fn test_transit_burn_failure_holds_funds() {
		let f = fixture(OrchestratorConfig::default()).await;
		let transfer = f
			.orchestrator
			.process_intent(intent(&f, TOKEN, "c-chain", "d-chain", 30))
			.await
			.unwrap();
		assert_eq!(transfer.route, TransferRoute::Transit);

		f.batcher.flush_now().await;
		wait_for(&f, transfer.id, |t| t.settlement_ids.len() == 2).await;

		f.chain.fail_next_issues(1).await;
		f.batcher.flush_now().await;
		let done = wait_for(&f, transfer.id, |t| t.status.is_terminal()).await;
		assert_eq!(done.status, TransferStatus::Failed);
		assert!(done
			.error
			.unwrap()
			.contains("funds held by temporary holder"));

		let held = f.orchestrator.held_transits().await;
		assert_eq!(held.len(), 1);
		assert_eq!(held[0].amount, 30);
		assert_eq!(held[0].holder, chains().temporary_holder);
		assert_eq!(held[0].mint_settlement, Some(transfer.settlement_ids[0]));
	}

	#[tokio::test]
	async fn test_transit_risk_limit() {
		let f = fixture(OrchestratorConfig {
			transit_risk_limit: Some(50),
			..OrchestratorConfig::default()
		})
		.await;
		let err = f
			.orchestrator
			.process_intent(intent(&f, TOKEN, "c-chain", "d-chain", 51))
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			OrchestratorError::Validation(ValidationError::TransitRiskLimit { .. })
		));
		assert!(f
			.orchestrator
			.process_intent(intent(&f, TOKEN, "c-chain", "x-chain", 51))
			.await
			.is_ok());
	}

	#[tokio::test]
	async fn test_nft_reserved_until_completion_then_relocated() {
		let f = fixture(OrchestratorConfig::default()).await;
		let err = f
			.orchestrator
			.process_intent(intent(&f, NFT, "c-chain", "x-chain", 2))
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			OrchestratorError::Validation(ValidationError::NonFungibleAmount(2))
		));

		let transfer = f
			.orchestrator
			.process_intent(intent(&f, NFT, "c-chain", "x-chain", 1))
			.await
			.unwrap();
		assert!(f.orchestrator.registry().get(&NFT).unwrap().in_flight);
		assert!(f
			.orchestrator
			.process_intent(intent(&f, NFT, "c-chain", "x-chain", 1))
			.await
			.is_err());

		f.batcher.flush_now().await;
		wait_for(&f, transfer.id, |t| t.status == TransferStatus::Completed).await;
		let nft = f.orchestrator.registry().get(&NFT).unwrap();
		assert!(!nft.in_flight);
		assert_eq!(nft.current_chain, ChainId::from("x-chain"));
	}

	#[tokio::test]
	async fn test_stake_and_unstake_validator_nft() {
		let f = fixture(OrchestratorConfig::default()).await;
		let node_id = NodeId([0x42; 20]);
		let mut i = intent(&f, VALIDATOR_NFT, "c-chain", "p-chain", 1);
		i.metadata
			.insert(stake_keys::NODE_ID.into(), hex::encode(node_id.as_bytes()));
		i.metadata.insert(stake_keys::STAKE_AMOUNT.into(), "2000".into());
		i.metadata.insert(stake_keys::DURATION_SECS.into(), "86400".into());
		i.metadata.insert(stake_keys::DELEGATION_FEE.into(), "250".into());
		sign_intent(&f.key, &mut i);

		let transfer = f.orchestrator.process_intent(i).await.unwrap();
		assert_eq!(transfer.route, TransferRoute::Stake);
		assert_eq!(transfer.status, TransferStatus::Completed);
		assert!(transfer.authorization.is_some());

		let entry = f.validators.get(&node_id).unwrap();
		assert_eq!(entry.weight, 2000);
		assert_eq!(entry.nft, Some(VALIDATOR_NFT));
		let nft = f.orchestrator.validator_nfts().get(&VALIDATOR_NFT).unwrap();
		assert!(nft.active);
		assert_eq!(nft.delegation_fee, 250);
		assert_eq!(nft.owner, sender_address(&f.key));
		assert_eq!(
			f.orchestrator.registry().get(&VALIDATOR_NFT).unwrap().current_chain,
			ChainId::from("p-chain")
		);

		let unstaked = f
			.orchestrator
			.unstake_validator_nft(&VALIDATOR_NFT)
			.await
			.unwrap();
		assert!(!unstaked.active);
		assert!(f.validators.get(&node_id).is_none());
		assert!(f
			.orchestrator
			.validator_nfts()
			.get(&VALIDATOR_NFT)
			.is_some());
		// Unstaking twice is a no-op.
		f.orchestrator
			.unstake_validator_nft(&VALIDATOR_NFT)
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn test_stake_from_settlement_chain_waits_for_lock() {
		let f = fixture(OrchestratorConfig::default()).await;
		let settled_nft = Id([8; 32]);
		f.orchestrator
			.registry()
			.register(asset(settled_nft, AssetType::ValidatorNft, "x-chain"))
			.await
			.unwrap();
		let node_id = NodeId([0x43; 20]);
		let stake_intent = |f: &Fixture| {
			let mut i = intent(f, settled_nft, "x-chain", "p-chain", 1);
			i.intent_type = IntentType::Stake;
			i.metadata
				.insert(stake_keys::NODE_ID.into(), hex::encode(node_id.as_bytes()));
			i.metadata.insert(stake_keys::STAKE_AMOUNT.into(), "1500".into());
			i.metadata.insert(stake_keys::DURATION_SECS.into(), "3600".into());
			sign_intent(&f.key, &mut i);
			i
		};

		// Without the NFT on the settlement chain nothing can be locked.
		let err = f.orchestrator.process_intent(stake_intent(&f)).await.unwrap_err();
		assert!(matches!(err, OrchestratorError::Settlement { .. }));
		assert!(f.validators.get(&node_id).is_none());
		assert!(!f.orchestrator.registry().get(&settled_nft).unwrap().in_flight);

		f.chain.credit(&sender_address(&f.key), settled_nft, 1).await;
		let transfer = f.orchestrator.process_intent(stake_intent(&f)).await.unwrap();
		assert_eq!(transfer.route, TransferRoute::Stake);
		assert_eq!(transfer.status, TransferStatus::Settling);
		assert_eq!(transfer.settlement_ids.len(), 1);
		assert!(f.validators.get(&node_id).is_none());
		assert!(f.orchestrator.validator_nfts().get(&settled_nft).is_none());

		f.batcher.flush_now().await;
		let done = wait_for(&f, transfer.id, |t| t.status.is_terminal()).await;
		assert_eq!(done.status, TransferStatus::Completed, "{:?}", done.error);
		assert!(done.authorization.is_some());
		assert_eq!(f.chain.issued().await.len(), 1);
		assert_eq!(f.validators.get(&node_id).unwrap().weight, 1500);
		assert!(f.orchestrator.validator_nfts().get(&settled_nft).unwrap().active);
		assert_eq!(
			f.orchestrator.registry().get(&settled_nft).unwrap().current_chain,
			ChainId::from("p-chain")
		);
	}

	#[tokio::test]
	async fn test_consumed_intents_survive_restart_until_deadline() {
		let f = fixture(OrchestratorConfig::default()).await;
		let i = intent(&f, TOKEN, "c-chain", "x-chain", 5);
		let replay = i.clone();
		f.orchestrator.process_intent(i).await.unwrap();

		let inner = &f.orchestrator.inner;
		let restarted = TransferOrchestrator::new(
			OrchestratorConfig::default(),
			OrchestratorDeps {
				chains: inner.chains.clone(),
				batcher: inner.batcher.clone(),
				sessions: inner.sessions.clone(),
				proofs: inner.proofs.clone(),
				proof_system: inner.proof_system.clone(),
				validators: inner.validators.clone(),
				authenticator: inner.authenticator.clone(),
				execution_chains: inner.execution_chains.clone(),
				storage: inner.storage.clone(),
				events: inner.events.clone(),
			},
		);
		restarted.load().await.unwrap();
		let err = restarted.process_intent(replay).await.unwrap_err();
		assert!(matches!(
			err,
			OrchestratorError::Validation(ValidationError::Duplicate(_))
		));

		let mut short = intent(&f, TOKEN, "c-chain", "x-chain", 5);
		short.deadline = Utc::now() + chrono::Duration::milliseconds(300);
		sign_intent(&f.key, &mut short);
		let short_id = short.id;
		restarted.process_intent(short).await.unwrap();
		assert_eq!(restarted.prune_consumed().await, 0);

		tokio::time::sleep(Duration::from_millis(400)).await;
		assert_eq!(restarted.prune_consumed().await, 1);
		assert!(!inner
			.storage
			.exists(Namespace::Transfers, &consumed_key(&short_id))
			.await
			.unwrap());
		assert_eq!(restarted.inner.consumed.read().await.len(), 1);
	}

	#[tokio::test]
	async fn test_refund_settling_transfer_once() {
		let f = fixture(OrchestratorConfig::default()).await;
		let transfer = f
			.orchestrator
			.process_intent(intent(&f, NFT, "c-chain", "x-chain", 1))
			.await
			.unwrap();
		assert!(f.orchestrator.refund(transfer.id, "timed out").await.unwrap());
		assert!(!f.orchestrator.refund(transfer.id, "timed out").await.unwrap());

		let refunded = f.orchestrator.get_transfer(transfer.id).await.unwrap().unwrap();
		assert_eq!(refunded.status, TransferStatus::Refunded);
		assert_eq!(refunded.error.as_deref(), Some("timed out"));
		assert!(!f.orchestrator.registry().get(&NFT).unwrap().in_flight);

		// The queued mint is cancelled and never reaches the chain.
		let mint = f
			.batcher
			.get_settlement(transfer.settlement_ids[0])
			.await
			.unwrap()
			.unwrap();
		assert_eq!(mint.status, SettlementStatus::Failed);
		assert!(mint.error.unwrap().contains("timed out"));
		f.batcher.flush_now().await;
		tokio::time::sleep(Duration::from_millis(100)).await;
		assert!(f.chain.issued().await.is_empty());
		let after = f.orchestrator.get_transfer(transfer.id).await.unwrap().unwrap();
		assert_eq!(after.status, TransferStatus::Refunded);
		assert_eq!(f.orchestrator.stats().await.refunded, 1);
	}

	#[tokio::test]
	async fn test_pool_intents_dispatch_after_block_accept() {
		let f = fixture(OrchestratorConfig {
			sweep_interval_ms: 20,
			..OrchestratorConfig::default()
		})
		.await;
		let block = Id::random();
		let i = intent(&f, TOKEN, "c-chain", "x-chain", 5);
		f.orchestrator.pool().stage(block, i).await.unwrap();
		tokio::time::sleep(Duration::from_millis(100)).await;
		assert!(f.orchestrator.active_transfers().await.is_empty());

		f.orchestrator.pool().accept_block(&block).await;
		for _ in 0..100 {
			if !f.orchestrator.active_transfers().await.is_empty() {
				break;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		assert_eq!(f.orchestrator.active_transfers().await.len(), 1);
		assert!(f.orchestrator.pool().is_empty().await);
	}

	#[tokio::test]
	async fn test_purge_and_health() {
		let f = fixture(OrchestratorConfig {
			retention_secs: 0,
			busy_threshold: 1,
			overload_threshold: 2,
			..OrchestratorConfig::default()
		})
		.await;
		assert_eq!(f.orchestrator.health_status().await, HealthStatus::Healthy);

		let first = f
			.orchestrator
			.process_intent(intent(&f, TOKEN, "c-chain", "x-chain", 5))
			.await
			.unwrap();
		assert_eq!(f.orchestrator.health_status().await, HealthStatus::Busy);
		f.orchestrator
			.process_intent(intent(&f, TOKEN, "c-chain", "x-chain", 6))
			.await
			.unwrap();
		assert_eq!(f.orchestrator.health_status().await, HealthStatus::Overloaded);

		f.batcher.flush_now().await;
		wait_for(&f, first.id, |t| t.status.is_terminal()).await;
		tokio::time::sleep(Duration::from_millis(20)).await;
		f.orchestrator.purge_terminal().await;
		assert!(f.orchestrator.inner.transfers.read().await.get(&first.id).is_none());
		// Purged transfers are still served from storage.
		assert!(f.orchestrator.get_transfer(first.id).await.unwrap().is_some());
	}
}
