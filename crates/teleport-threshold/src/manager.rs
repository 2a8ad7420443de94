//! Threshold session manager.
//!
//! Owns the active-session map and runs one task per session. Each task
//! drives its protocol through the round functions in [`crate::keygen`] and
//! [`crate::signing`], which consume the previous round's state and return
//! the next one, so no two rounds ever touch the same session state.

use crate::crypto::{self, Signature};
use crate::error::ThresholdError;
use crate::keygen::{self, DealPlan};
use crate::keys::{GroupPublicKey, KeyShare, KeyStore, SignatureRecord};
use crate::rounds::RoundContext;
use crate::signing::{self, SignPlan};
use crate::transport::RoundTransport;
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use teleport_config::ThresholdConfig;
use teleport_storage::StorageService;
use teleport_types::{
	keccak256, EventBus, HealthStatus, Id, NodeId, SessionEvent, SessionId, SessionInfo,
	SessionResult, SessionState, SessionType, SignatureOutcome, TeleportEvent,
};
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

/// Finished sessions kept for [`ThresholdSessionManager::get_result`].
const FINISHED_HISTORY: usize = 1024;

/// Request to start a protocol session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRequest {
	KeyGen {
		key_id: Id,
		participants: Vec<NodeId>,
		threshold: usize,
	},
	Sign {
		key_id: Id,
		message: Vec<u8>,
	},
	/// Moves an existing key to a new participant set and threshold.
	Reshare {
		key_id: Id,
		participants: Vec<NodeId>,
		threshold: usize,
	},
	/// Re-randomizes the shares of an existing key among the same participants.
	Refresh { key_id: Id },
}

impl SessionRequest {
	pub fn session_type(&self) -> SessionType {
		match self {
			SessionRequest::KeyGen { .. } => SessionType::KeyGen,
			SessionRequest::Sign { .. } => SessionType::Sign,
			SessionRequest::Reshare { .. } => SessionType::Reshare,
			SessionRequest::Refresh { .. } => SessionType::Refresh,
		}
	}

	pub fn key_id(&self) -> Id {
		match self {
			SessionRequest::KeyGen { key_id, .. }
			| SessionRequest::Sign { key_id, .. }
			| SessionRequest::Reshare { key_id, .. }
			| SessionRequest::Refresh { key_id } => *key_id,
		}
	}
}

/// Counters exposed through [`ThresholdSessionManager::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThresholdStats {
	pub keys_generated: u64,
	pub signatures_produced: u64,
	pub failed_sessions: u64,
	pub active_sessions: usize,
}

enum Protocol {
	Deal(DealPlan),
	Sign(SignPlan),
}

struct SessionEntry {
	info: SessionInfo,
	last_progress: Instant,
	state_tx: watch::Sender<SessionState>,
	task: Option<AbortHandle>,
}

#[derive(Default)]
struct FinishedSessions {
	by_id: HashMap<SessionId, SessionInfo>,
	order: VecDeque<SessionId>,
}

impl FinishedSessions {
	fn push(&mut self, info: SessionInfo) {
		let id = info.id;
		if self.by_id.insert(id, info).is_none() {
			self.order.push_back(id);
		}
		while self.order.len() > FINISHED_HISTORY {
			if let Some(old) = self.order.pop_front() {
				self.by_id.remove(&old);
			}
		}
	}
}

struct Inner {
	config: ThresholdConfig,
	local: Vec<NodeId>,
	storage: Arc<StorageService>,
	transport: Arc<dyn RoundTransport>,
	events: EventBus,
	sessions: RwLock<HashMap<SessionId, SessionEntry>>,
	finished: RwLock<FinishedSessions>,
	keys_generated: AtomicU64,
	signatures_produced: AtomicU64,
	failed_sessions: AtomicU64,
}

/// Runs key generation, resharing and signing sessions among the validator quorum.
///
/// Cloning yields another handle to the same manager.
#[derive(Clone)]
pub struct ThresholdSessionManager {
	inner: Arc<Inner>,
}

impl ThresholdSessionManager {
	pub fn new(
		config: ThresholdConfig,
		storage: Arc<StorageService>,
		transport: Arc<dyn RoundTransport>,
		events: EventBus,
	) -> Self {
		let local = config.local_parties();
		Self {
			inner: Arc::new(Inner {
				config,
				local,
				storage,
				transport,
				events,
				sessions: RwLock::new(HashMap::new()),
				finished: RwLock::new(FinishedSessions::default()),
				keys_generated: AtomicU64::new(0),
				signatures_produced: AtomicU64::new(0),
				failed_sessions: AtomicU64::new(0),
			}),
		}
	}

	pub fn config(&self) -> &ThresholdConfig {
		&self.inner.config
	}

	/// Key used for settlement transactions and block signatures.
	pub fn signing_key_id(&self) -> Id {
		self.inner.config.signing_key_id
	}

	/// Starts a session and returns its ID. The protocol runs in the background.
	pub async fn start_session(&self, request: SessionRequest) -> Result<SessionId, ThresholdError> {
		self.start(request).await.map(|(id, _)| id)
	}

	async fn start(
		&self,
		request: SessionRequest,
	) -> Result<(SessionId, watch::Receiver<SessionState>), ThresholdError> {
		let session_type = request.session_type();
		let key_id = request.key_id();
		let (protocol, participants, threshold) = self.plan(request).await?;

		let info = SessionInfo::new(session_type, key_id, participants, threshold);
		let session_id = info.id;
		let (state_tx, state_rx) = watch::channel(info.state);

		{
			let mut sessions = self.inner.sessions.write().await;
			let max = self.inner.config.max_concurrent_sessions;
			if sessions.len() >= max {
				return Err(ThresholdError::TooManySessions {
					active: sessions.len(),
					max,
				});
			}
			if session_type == SessionType::KeyGen
				&& sessions
					.values()
					.any(|e| e.info.key_id == key_id && e.info.session_type == SessionType::KeyGen)
			{
				return Err(ThresholdError::KeyExists(key_id));
			}

			let inner = self.inner.clone();
			let task = tokio::spawn(async move { run_session(inner, session_id, protocol).await });
			sessions.insert(
				session_id,
				SessionEntry {
					info,
					last_progress: Instant::now(),
					state_tx,
					task: Some(task.abort_handle()),
				},
			);
		}

		info!(session_id = %session_id, key_id = %key_id, "Started {} session", session_type);
		self.inner.publish(SessionEvent::Started {
			session_id,
			session_type,
		});
		Ok((session_id, state_rx))
	}

	/// Validates a request and prepares the protocol inputs.
	async fn plan(
		&self,
		request: SessionRequest,
	) -> Result<(Protocol, Vec<NodeId>, usize), ThresholdError> {
		let store = KeyStore::new(&self.inner.storage);
		match request {
			SessionRequest::KeyGen {
				key_id,
				participants,
				threshold,
			} => {
				check_participants(&participants, threshold)?;
				self.require_local(&participants)?;
				if store.group_key(&key_id).await?.is_some() {
					return Err(ThresholdError::KeyExists(key_id));
				}
				let plan = DealPlan::fresh(key_id, participants.clone(), threshold, &self.inner.local);
				Ok((Protocol::Deal(plan), participants, threshold))
			},
			SessionRequest::Sign { key_id, message } => {
				let key = self.require_key(&key_id).await?;
				let shares = self.local_shares(&key).await?;
				let participants = key.participants.clone();
				let threshold = key.threshold;
				let plan = SignPlan {
					key,
					shares,
					message_hash: keccak256(&message),
				};
				Ok((Protocol::Sign(plan), participants, threshold))
			},
			SessionRequest::Reshare {
				key_id,
				participants,
				threshold,
			} => {
				check_participants(&participants, threshold)?;
				let key = self.require_key(&key_id).await?;
				self.reshare_plan(key, participants, threshold).await
			},
			SessionRequest::Refresh { key_id } => {
				let key = self.require_key(&key_id).await?;
				let participants = key.participants.clone();
				let threshold = key.threshold;
				self.reshare_plan(key, participants, threshold).await
			},
		}
	}

	async fn reshare_plan(
		&self,
		key: GroupPublicKey,
		participants: Vec<NodeId>,
		threshold: usize,
	) -> Result<(Protocol, Vec<NodeId>, usize), ThresholdError> {
		let mut members = key.participants.clone();
		members.extend(participants.iter().copied());
		self.require_local(&members)?;
		let shares = match self.local_shares(&key).await {
			Ok(shares) => shares,
			Err(ThresholdError::NoLocalShare { .. }) => Vec::new(),
			Err(e) => return Err(e),
		};
		let plan = DealPlan::reshare(key, &shares, participants.clone(), threshold)?;
		Ok((Protocol::Deal(plan), participants, threshold))
	}

	fn require_local(&self, members: &[NodeId]) -> Result<(), ThresholdError> {
		if members.iter().any(|m| self.inner.local.contains(m)) {
			Ok(())
		} else {
			Err(ThresholdError::InvalidRequest(
				"no local party takes part in the session".into(),
			))
		}
	}

	async fn require_key(&self, key_id: &Id) -> Result<GroupPublicKey, ThresholdError> {
		KeyStore::new(&self.inner.storage)
			.group_key(key_id)
			.await?
			.ok_or(ThresholdError::KeyNotFound(*key_id))
	}

	/// Shares held by local parties for the key's current epoch.
	async fn local_shares(&self, key: &GroupPublicKey) -> Result<Vec<KeyShare>, ThresholdError> {
		let store = KeyStore::new(&self.inner.storage);
		let mut shares = Vec::new();
		for node in self.inner.local.iter().filter(|n| key.participants.contains(n)) {
			if let Some(share) = store.share(&key.key_id, key.epoch, node).await? {
				shares.push(share);
			}
		}
		if shares.is_empty() {
			let node = self.inner.local.first().copied().unwrap_or_default();
			return Err(ThresholdError::NoLocalShare {
				key_id: key.key_id,
				node,
			});
		}
		Ok(shares)
	}

	/// Result and state of a running or recently finished session.
	pub async fn get_result(
		&self,
		session_id: SessionId,
	) -> Result<(Option<SessionResult>, SessionState), ThresholdError> {
		let info = self
			.session(session_id)
			.await
			.ok_or(ThresholdError::SessionNotFound(session_id))?;
		Ok((info.result, info.state))
	}

	pub async fn session(&self, session_id: SessionId) -> Option<SessionInfo> {
		if let Some(entry) = self.inner.sessions.read().await.get(&session_id) {
			return Some(entry.info.clone());
		}
		self.inner.finished.read().await.by_id.get(&session_id).cloned()
	}

	pub async fn active_sessions(&self) -> Vec<SessionInfo> {
		self.inner
			.sessions
			.read()
			.await
			.values()
			.map(|e| e.info.clone())
			.collect()
	}

	/// Signs `message` with `key_id`, waiting for the session to finish or
	/// for the configured sign timeout.
	pub async fn sign(&self, key_id: Id, message: &[u8]) -> Result<SignatureOutcome, ThresholdError> {
		let (session_id, mut state_rx) = self
			.start(SessionRequest::Sign {
				key_id,
				message: message.to_vec(),
			})
			.await?;

		// The watch guard must not outlive this expression.
		let waited = tokio::time::timeout(self.inner.config.sign_timeout(), async {
			state_rx.wait_for(|s| s.is_terminal()).await.map(|s| *s)
		})
		.await;
		let state = match waited {
			Ok(Ok(state)) => state,
			Ok(Err(_)) => SessionState::Aborted,
			Err(_) => {
				warn!(session_id = %session_id, "Sign session timed out");
				self.inner
					.terminate(session_id, SessionState::Failed, "sign timeout")
					.await;
				return Err(ThresholdError::Timeout(session_id));
			},
		};

		let info = self
			.session(session_id)
			.await
			.ok_or(ThresholdError::SessionNotFound(session_id))?;
		match (state, info.result) {
			(SessionState::Completed, Some(SessionResult::Signature { signature, .. })) => {
				Ok(SignatureOutcome {
					session_id,
					signature,
				})
			},
			_ => Err(ThresholdError::SessionEnded {
				session_id,
				state: info.state,
				reason: info.error.unwrap_or_default(),
			}),
		}
	}

	/// Verifies a block signature: enough signer bits for a two-thirds quorum
	/// of `validator_count`, and a valid signature under the signing key.
	pub async fn verify_aggregate(
		&self,
		message: &[u8],
		signature: &[u8],
		signer_bitmap: &[u8],
		validator_count: usize,
	) -> Result<(), ThresholdError> {
		let need = (2 * validator_count + 2) / 3;
		let have = (0..validator_count)
			.filter(|i| {
				signer_bitmap
					.get(i / 8)
					.is_some_and(|&byte| (byte >> (i % 8)) & 1 == 1)
			})
			.count();
		if have < need {
			return Err(ThresholdError::InsufficientSigners { have, need });
		}

		let key = self.require_key(&self.inner.config.signing_key_id).await?;
		let signature = Signature::from_bytes(signature)
			.ok_or_else(|| ThresholdError::InvalidSignature("malformed signature".into()))?;
		if !crypto::verify(&key.public_key, &keccak256(message), &signature) {
			return Err(ThresholdError::InvalidSignature(
				"signature does not verify under the group key".into(),
			));
		}
		Ok(())
	}

	pub async fn group_key(&self, key_id: &Id) -> Result<Option<GroupPublicKey>, ThresholdError> {
		KeyStore::new(&self.inner.storage).group_key(key_id).await
	}

	pub async fn signature(&self, session_id: &SessionId) -> Result<Option<SignatureRecord>, ThresholdError> {
		KeyStore::new(&self.inner.storage).signature(session_id).await
	}

	/// Records a key-generation result confirmed by a block.
	///
	/// Nodes that took part must have derived the same key; other nodes keep
	/// a watch-only record of the public key.
	pub async fn store_keygen_result(
		&self,
		session_id: SessionId,
		key_id: Id,
		public_key: &[u8],
	) -> Result<(), ThresholdError> {
		let store = KeyStore::new(&self.inner.storage);
		let key = match store.group_key(&key_id).await? {
			Some(mut key) => {
				if key.public_key_bytes() != public_key {
					return Err(ThresholdError::KeyMismatch(key_id));
				}
				key.confirmed_by = Some(session_id);
				key
			},
			None => {
				let point = crypto::decode_point(public_key).ok_or_else(|| {
					ThresholdError::InvalidRequest(format!("malformed public key for {}", key_id))
				})?;
				GroupPublicKey {
					key_id,
					epoch: 0,
					public_key: point,
					participants: Vec::new(),
					verification_shares: Vec::new(),
					threshold: 0,
					confirmed_by: Some(session_id),
					created_at: Utc::now(),
				}
			},
		};
		store.save_group_key(&key).await?;
		info!(session_id = %session_id, key_id = %key_id, "Stored key generation result");
		Ok(())
	}

	/// Records a signature confirmed by a block. The block's copy wins over a
	/// locally combined one.
	pub async fn store_signature(
		&self,
		session_id: SessionId,
		signature: &[u8],
		signers: Vec<NodeId>,
	) -> Result<(), ThresholdError> {
		let store = KeyStore::new(&self.inner.storage);
		let encoded = hex::encode(signature);
		let existing = store.signature(&session_id).await?;
		if let Some(existing) = &existing {
			if existing.signature == encoded {
				return Ok(());
			}
			warn!(session_id = %session_id, "Replacing local signature with confirmed one");
		}
		store
			.save_signature(&SignatureRecord {
				session_id,
				key_id: existing.and_then(|e| e.key_id),
				signature: encoded,
				signers,
				stored_at: Utc::now(),
			})
			.await
	}

	/// Confirms a reshare or refresh. The group key must be unchanged.
	pub async fn update_key_shares(
		&self,
		session_id: SessionId,
		key_id: Id,
		public_key: &[u8],
	) -> Result<(), ThresholdError> {
		let store = KeyStore::new(&self.inner.storage);
		let mut key = store
			.group_key(&key_id)
			.await?
			.ok_or(ThresholdError::KeyNotFound(key_id))?;
		if key.public_key_bytes() != public_key {
			return Err(ThresholdError::KeyMismatch(key_id));
		}
		key.confirmed_by = Some(session_id);
		store.save_group_key(&key).await?;
		info!(session_id = %session_id, key_id = %key_id, epoch = key.epoch, "Key shares updated");
		Ok(())
	}

	/// Aborts a session. Cleaning up a finished session is a no-op.
	pub async fn cleanup_session(&self, session_id: SessionId) -> Result<(), ThresholdError> {
		if self
			.inner
			.terminate(session_id, SessionState::Aborted, "aborted")
			.await
		{
			return Ok(());
		}
		if self.inner.finished.read().await.by_id.contains_key(&session_id) {
			return Ok(());
		}
		Err(ThresholdError::SessionNotFound(session_id))
	}

	/// Fails sessions that made no progress within the session timeout.
	/// Returns how many expired.
	pub async fn sweep_expired(&self) -> usize {
		let timeout = self.inner.config.session_timeout();
		let stale: Vec<SessionId> = self
			.inner
			.sessions
			.read()
			.await
			.iter()
			.filter(|(_, e)| e.last_progress.elapsed() > timeout)
			.map(|(id, _)| *id)
			.collect();

		let mut expired = 0;
		for session_id in stale {
			if self
				.inner
				.terminate(session_id, SessionState::Failed, "session timed out")
				.await
			{
				self.inner.publish(SessionEvent::Expired { session_id });
				expired += 1;
			}
		}
		expired
	}

	/// Periodic stale-session sweep. Aborts every active session on shutdown.
	pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ThresholdError> {
		let mut interval = tokio::time::interval(self.inner.config.sweep_interval());
		loop {
			tokio::select! {
				_ = interval.tick() => {
					let expired = self.sweep_expired().await;
					if expired > 0 {
						warn!("Expired {} stale sessions", expired);
					}
				}
				_ = shutdown.recv() => {
					info!("Threshold session manager shutting down");
					let active: Vec<SessionId> =
						self.inner.sessions.read().await.keys().copied().collect();
					for session_id in active {
						self.inner
							.terminate(session_id, SessionState::Aborted, "shutdown")
							.await;
					}
					break;
				}
			}
		}
		Ok(())
	}

	pub async fn health_status(&self) -> HealthStatus {
		let active = self.inner.sessions.read().await.len();
		let max = self.inner.config.max_concurrent_sessions;
		if active >= max {
			HealthStatus::Overloaded
		} else if active > max / 2 {
			HealthStatus::Busy
		} else {
			HealthStatus::Healthy
		}
	}

	pub async fn stats(&self) -> ThresholdStats {
		ThresholdStats {
			keys_generated: self.inner.keys_generated.load(Ordering::Relaxed),
			signatures_produced: self.inner.signatures_produced.load(Ordering::Relaxed),
			failed_sessions: self.inner.failed_sessions.load(Ordering::Relaxed),
			active_sessions: self.inner.sessions.read().await.len(),
		}
	}
}

fn check_participants(participants: &[NodeId], threshold: usize) -> Result<(), ThresholdError> {
	if participants.is_empty() {
		return Err(ThresholdError::InvalidRequest("no participants".into()));
	}
	if threshold == 0 || threshold > participants.len() {
		return Err(ThresholdError::InvalidRequest(format!(
			"threshold {} outside 1..={}",
			threshold,
			participants.len()
		)));
	}
	let unique: HashSet<&NodeId> = participants.iter().collect();
	if unique.len() != participants.len() {
		return Err(ThresholdError::InvalidRequest("duplicate participant".into()));
	}
	Ok(())
}

impl Inner {
	fn publish(&self, event: SessionEvent) {
		self.events.publish(TeleportEvent::Session(event)).ok();
	}

	async fn set_round(&self, session_id: SessionId, round: u8) {
		let mut sessions = self.sessions.write().await;
		if let Some(entry) = sessions.get_mut(&session_id) {
			if entry.info.state == SessionState::Pending {
				entry.info.advance(SessionState::Active);
				let _ = entry.state_tx.send(SessionState::Active);
			}
			entry.info.round = round;
			entry.info.updated_at = Utc::now();
			entry.last_progress = Instant::now();
			debug!(session_id = %session_id, round, "Session advanced");
		}
	}

	/// Moves a session out of the active map into `state`. Returns false if
	/// the session was not active.
	async fn finish(
		&self,
		session_id: SessionId,
		state: SessionState,
		result: Option<SessionResult>,
		error: Option<String>,
	) -> bool {
		let Some(mut entry) = self.sessions.write().await.remove(&session_id) else {
			return false;
		};
		if !entry.info.advance(state) {
			warn!(session_id = %session_id, "Ignoring {} -> {} transition", entry.info.state, state);
		}
		entry.info.result = result;
		entry.info.error = error.clone();
		let _ = entry.state_tx.send(entry.info.state);
		self.finished.write().await.push(entry.info);

		match state {
			SessionState::Completed => {
				info!(session_id = %session_id, "Session completed");
				self.publish(SessionEvent::Completed { session_id });
			},
			_ => {
				let error = error.unwrap_or_else(|| state.to_string());
				self.failed_sessions.fetch_add(1, Ordering::Relaxed);
				warn!(session_id = %session_id, "Session {}: {}", state, error);
				self.publish(SessionEvent::Failed { session_id, error });
			},
		}
		true
	}

	/// Ends a session from outside its task and stops the task.
	async fn terminate(&self, session_id: SessionId, state: SessionState, reason: &str) -> bool {
		let task = self
			.sessions
			.write()
			.await
			.get_mut(&session_id)
			.and_then(|e| e.task.take());
		let finished = self
			.finish(session_id, state, None, Some(reason.to_string()))
			.await;
		if let Some(task) = task {
			task.abort();
		}
		if finished {
			self.transport.discard(session_id).await;
		}
		finished
	}
}

async fn run_session(inner: Arc<Inner>, session_id: SessionId, protocol: Protocol) {
	let ctx = RoundContext {
		session_id,
		transport: inner.transport.clone(),
		storage: inner.storage.clone(),
		local: inner.local.clone(),
		round_timeout: inner.config.round_timeout(),
	};
	inner.set_round(session_id, 1).await;

	let outcome = match protocol {
		Protocol::Deal(plan) => run_deal(&inner, &ctx, plan).await.map(|key| {
			inner.keys_generated.fetch_add(1, Ordering::Relaxed);
			SessionResult::GroupKey {
				public_key: key.public_key_bytes(),
			}
		}),
		Protocol::Sign(plan) => run_sign(&inner, &ctx, plan).await,
	};

	inner.transport.discard(session_id).await;
	match outcome {
		Ok(result) => {
			inner
				.finish(session_id, SessionState::Completed, Some(result), None)
				.await;
		},
		Err(e) => {
			error!(session_id = %session_id, "Session failed: {}", e);
			inner
				.finish(session_id, SessionState::Failed, None, Some(e.to_string()))
				.await;
		},
	}
}

async fn run_deal(
	inner: &Inner,
	ctx: &RoundContext,
	plan: DealPlan,
) -> Result<GroupPublicKey, ThresholdError> {
	let committed = keygen::commit(ctx, plan).await?;
	inner.set_round(ctx.session_id, keygen::ROUND_SHARE).await;
	let dealt = keygen::deal(ctx, committed).await?;
	inner.set_round(ctx.session_id, keygen::ROUND_COMBINE).await;
	keygen::combine(ctx, dealt).await
}

async fn run_sign(
	inner: &Inner,
	ctx: &RoundContext,
	plan: SignPlan,
) -> Result<SessionResult, ThresholdError> {
	let key_id = plan.key.key_id;
	let state = signing::commit_nonces(ctx, plan).await?;
	inner.set_round(ctx.session_id, signing::ROUND_PARTIAL).await;
	let state = signing::send_partials(ctx, state).await?;
	inner.set_round(ctx.session_id, signing::ROUND_COMBINE).await;
	let output = signing::combine(ctx, state).await?;

	let signature = output.signature.to_bytes();
	KeyStore::new(&ctx.storage)
		.save_signature(&SignatureRecord {
			session_id: ctx.session_id,
			key_id: Some(key_id),
			signature: hex::encode(&signature),
			signers: output.signers.clone(),
			stored_at: Utc::now(),
		})
		.await?;
	inner.signatures_produced.fetch_add(1, Ordering::Relaxed);
	Ok(SessionResult::Signature {
		signature,
		signers: output.signers,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::InMemoryTransport;
	use std::time::Duration;

	fn nodes(n: u8) -> Vec<NodeId> {
		(1..=n).map(|i| NodeId([i; 20])).collect()
	}

	fn config(participants: Vec<NodeId>, threshold: usize) -> ThresholdConfig {
		ThresholdConfig {
			participants,
			local_parties: Vec::new(),
			threshold,
			signing_key_id: Id([9; 32]),
			round_timeout_ms: 300,
			session_timeout_secs: 1,
			sign_timeout_ms: 5_000,
			max_concurrent_sessions: 4,
			sweep_interval_ms: 50,
		}
	}

	fn manager(config: ThresholdConfig) -> ThresholdSessionManager {
		ThresholdSessionManager::new(
			config,
			Arc::new(StorageService::in_memory()),
			Arc::new(InMemoryTransport::new()),
			EventBus::new(64),
		)
	}

	async fn wait_terminal(manager: &ThresholdSessionManager, id: SessionId) -> SessionState {
		for _ in 0..200 {
			let (_, state) = manager.get_result(id).await.unwrap();
			if state.is_terminal() {
				return state;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		panic!("session {} did not finish", id);
	}

	async fn keygen(manager: &ThresholdSessionManager, key_id: Id) {
		let cfg = manager.config().clone();
		let id = manager
			.start_session(SessionRequest::KeyGen {
				key_id,
				participants: cfg.participants.clone(),
				threshold: cfg.threshold,
			})
			.await
			.unwrap();
		assert_eq!(wait_terminal(manager, id).await, SessionState::Completed);
	}

	fn bitmap(bits: usize) -> Vec<u8> {
		let mut map = vec![0u8; 13];
		for i in 0..bits {
			map[i / 8] |= 1 << (i % 8);
		}
		map
	}

	#[tokio::test]
	async fn test_keygen_then_sign() {
		let manager = manager(config(nodes(4), 3));
		let key_id = manager.signing_key_id();
		keygen(&manager, key_id).await;

		let outcome = manager.sign(key_id, b"block").await.unwrap();
		let record = manager.signature(&outcome.session_id).await.unwrap().unwrap();
		assert_eq!(record.signature, hex::encode(&outcome.signature));
		assert_eq!(record.signers.len(), 3);

		manager
			.verify_aggregate(b"block", &outcome.signature, &bitmap(100), 100)
			.await
			.unwrap();
		let stats = manager.stats().await;
		assert_eq!(stats.keys_generated, 1);
		assert_eq!(stats.signatures_produced, 1);
		assert_eq!(stats.active_sessions, 0);
	}

	#[tokio::test]
	async fn test_verify_aggregate_quorum_boundary() {
		let manager = manager(config(nodes(3), 2));
		let key_id = manager.signing_key_id();
		keygen(&manager, key_id).await;
		let outcome = manager.sign(key_id, b"block").await.unwrap();

		let err = manager
			.verify_aggregate(b"block", &outcome.signature, &bitmap(66), 100)
			.await
			.unwrap_err();
		assert_eq!(err, ThresholdError::InsufficientSigners { have: 66, need: 67 });

		manager
			.verify_aggregate(b"block", &outcome.signature, &bitmap(67), 100)
			.await
			.unwrap();
		assert!(matches!(
			manager
				.verify_aggregate(b"other", &outcome.signature, &bitmap(67), 100)
				.await,
			Err(ThresholdError::InvalidSignature(_))
		));
	}

	#[tokio::test]
	async fn test_round_one_failure_persists_nothing() {
		let participants = nodes(3);
		let mut cfg = config(participants.clone(), 2);
		cfg.local_parties = participants[..2].to_vec();
		let manager = manager(cfg);
		let key_id = Id::random();

		let id = manager
			.start_session(SessionRequest::KeyGen {
				key_id,
				participants,
				threshold: 2,
			})
			.await
			.unwrap();
		assert_eq!(wait_terminal(&manager, id).await, SessionState::Failed);

		let info = manager.session(id).await.unwrap();
		assert!(info.error.unwrap().contains("round 1"));
		assert!(manager.group_key(&key_id).await.unwrap().is_none());
		assert!(KeyStore::new(&manager.inner.storage)
			.shares_for(&key_id)
			.await
			.unwrap()
			.is_empty());
		assert_eq!(manager.stats().await.failed_sessions, 1);
	}

	#[tokio::test]
	async fn test_keygen_for_existing_key_rejected() {
		let manager = manager(config(nodes(3), 2));
		let key_id = Id::random();
		keygen(&manager, key_id).await;

		let err = manager
			.start_session(SessionRequest::KeyGen {
				key_id,
				participants: nodes(3),
				threshold: 2,
			})
			.await
			.unwrap_err();
		assert_eq!(err, ThresholdError::KeyExists(key_id));
	}

	#[tokio::test]
	async fn test_reshare_and_refresh_keep_group_key() {
		let manager = manager(config(nodes(5), 2));
		let key_id = Id::random();
		let id = manager
			.start_session(SessionRequest::KeyGen {
				key_id,
				participants: nodes(3),
				threshold: 2,
			})
			.await
			.unwrap();
		wait_terminal(&manager, id).await;
		let original = manager.group_key(&key_id).await.unwrap().unwrap();

		let id = manager
			.start_session(SessionRequest::Reshare {
				key_id,
				participants: nodes(5),
				threshold: 4,
			})
			.await
			.unwrap();
		assert_eq!(wait_terminal(&manager, id).await, SessionState::Completed);
		let id = manager
			.start_session(SessionRequest::Refresh { key_id })
			.await
			.unwrap();
		assert_eq!(wait_terminal(&manager, id).await, SessionState::Completed);

		let current = manager.group_key(&key_id).await.unwrap().unwrap();
		assert_eq!(current.public_key, original.public_key);
		assert_eq!(current.epoch, 2);
		assert_eq!(current.threshold, 4);

		let outcome = manager.sign(key_id, b"after reshare").await.unwrap();
		let sig = Signature::from_bytes(&outcome.signature).unwrap();
		assert!(crypto::verify(
			&original.public_key,
			&keccak256(b"after reshare"),
			&sig
		));
		manager
			.update_key_shares(id, key_id, &original.public_key_bytes())
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn test_stale_sessions_expire() {
		let participants = nodes(2);
		let mut cfg = config(participants.clone(), 2);
		cfg.local_parties = participants[..1].to_vec();
		cfg.round_timeout_ms = 10_000;
		let manager = manager(cfg);
		let mut events = manager.inner.events.subscribe();

		let id = manager
			.start_session(SessionRequest::KeyGen {
				key_id: Id::random(),
				participants,
				threshold: 1,
			})
			.await
			.unwrap();
		assert_eq!(manager.sweep_expired().await, 0);
		tokio::time::sleep(Duration::from_millis(1_100)).await;
		assert_eq!(manager.sweep_expired().await, 1);

		let (_, state) = manager.get_result(id).await.unwrap();
		assert_eq!(state, SessionState::Failed);
		let mut saw_expired = false;
		while let Ok(event) = events.try_recv() {
			if let TeleportEvent::Session(SessionEvent::Expired { session_id }) = event {
				saw_expired |= session_id == id;
			}
		}
		assert!(saw_expired);
	}

	#[tokio::test]
	async fn test_cleanup_aborts_session_and_capacity_is_enforced() {
		let participants = nodes(2);
		let mut cfg = config(participants.clone(), 1);
		cfg.local_parties = participants[..1].to_vec();
		cfg.round_timeout_ms = 10_000;
		cfg.max_concurrent_sessions = 2;
		let manager = manager(cfg);

		let request = |n: u8| SessionRequest::KeyGen {
			key_id: Id([n; 32]),
			participants: participants.clone(),
			threshold: 1,
		};
		let first = manager.start_session(request(1)).await.unwrap();
		manager.start_session(request(2)).await.unwrap();
		assert_eq!(manager.health_status().await, HealthStatus::Overloaded);
		assert!(matches!(
			manager.start_session(request(3)).await,
			Err(ThresholdError::TooManySessions { active: 2, max: 2 })
		));

		manager.cleanup_session(first).await.unwrap();
		let (_, state) = manager.get_result(first).await.unwrap();
		assert_eq!(state, SessionState::Aborted);
		assert_eq!(manager.health_status().await, HealthStatus::Healthy);
		manager.cleanup_session(first).await.unwrap();
		assert!(matches!(
			manager.cleanup_session(SessionId::new_v4()).await,
			Err(ThresholdError::SessionNotFound(_))
		));
	}

	#[tokio::test]
	async fn test_store_keygen_result_checks_local_key() {
		let manager = manager(config(nodes(3), 2));
		let key_id = Id::random();
		keygen(&manager, key_id).await;
		let key = manager.group_key(&key_id).await.unwrap().unwrap();
		let session = SessionId::new_v4();

		manager
			.store_keygen_result(session, key_id, &key.public_key_bytes())
			.await
			.unwrap();
		assert_eq!(
			manager.group_key(&key_id).await.unwrap().unwrap().confirmed_by,
			Some(session)
		);

		let other = random_point_bytes();
		assert_eq!(
			manager.store_keygen_result(session, key_id, &other).await,
			Err(ThresholdError::KeyMismatch(key_id))
		);

		// Unknown keys are kept watch-only.
		let foreign = Id::random();
		manager
			.store_keygen_result(session, foreign, &other)
			.await
			.unwrap();
		assert!(manager.group_key(&foreign).await.unwrap().unwrap().is_watch_only());
		assert!(matches!(
			manager.sign(foreign, b"x").await,
			Err(ThresholdError::NoLocalShare { .. })
		));
	}

	fn random_point_bytes() -> Vec<u8> {
		curve25519_dalek::ristretto::RistrettoPoint::mul_base(&crypto::random_scalar())
			.compress()
			.as_bytes()
			.to_vec()
	}

	#[tokio::test]
	async fn test_store_signature_is_idempotent() {
		let manager = manager(config(nodes(1), 1));
		let session = SessionId::new_v4();
		manager
			.store_signature(session, &[1, 2, 3], nodes(1))
			.await
			.unwrap();
		manager
			.store_signature(session, &[1, 2, 3], nodes(1))
			.await
			.unwrap();
		let record = manager.signature(&session).await.unwrap().unwrap();
		assert_eq!(record.signature, "010203");
	}
}
