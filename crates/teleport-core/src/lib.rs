//! Node assembly for the teleport subsystem.
//!
//! [`NodeBuilder`] wires the session manager, settlement batcher and
//! transfer orchestrator to their collaborators. [`TeleportNode`] runs their
//! background loops and exposes the [`BlockOperationApplier`] through which
//! accepted and rejected blocks reach them.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use teleport_chains::{
	ChainRegistry, DigestProofSystem, InMemoryValidatorSet, LocalExecutionChain,
	LocalSettlementChain, PROOF_SYSTEM,
};
use teleport_config::{validate_config, Config, StorageBackend};
use teleport_orchestrator::{
	Ed25519IntentAuthenticator, OrchestratorDeps, OrchestratorStats, TransferOrchestrator,
};
use teleport_settlement::{SettlementBatcher, SettlementStats};
use teleport_storage::{FileStorage, MemoryStorage, StorageService};
use teleport_threshold::{
	InMemoryTransport, RoundTransport, SessionRequest, ThresholdSessionManager, ThresholdSigner,
	ThresholdStats,
};
use teleport_types::{
	EventBus, ExecutionChainClient, HealthStatus, IntentAuthenticator, ProofGenerator,
	ProofVerifier, SessionState, SettlementChainClient, ValidatorSet,
};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

pub mod applier;
pub mod error;
pub mod lifecycle;

pub use applier::{ApplyOutcome, AppliedOperation, BlockOperationApplier, BlockReport, RejectReport};
pub use error::CoreError;
pub use lifecycle::{Lifecycle, NodeState};

#[derive(Debug, Clone, Serialize)]
pub struct NodeStats {
	pub health: HealthStatus,
	pub threshold: ThresholdStats,
	pub settlement: SettlementStats,
	pub orchestrator: OrchestratorStats,
}

/// A running teleport node.
pub struct TeleportNode {
	config: Config,
	storage: Arc<StorageService>,
	events: EventBus,
	lifecycle: Lifecycle,
	sessions: ThresholdSessionManager,
	batcher: SettlementBatcher,
	orchestrator: TransferOrchestrator,
	applier: BlockOperationApplier,
	validators: Arc<dyn ValidatorSet>,
	tasks: Mutex<JoinSet<()>>,
}

impl TeleportNode {
	/// Loads persisted state and starts the background loops. In dev mode
	/// the signing key is generated first if it does not exist yet.
	pub async fn start(&self) -> Result<(), CoreError> {
		self.lifecycle.set_state(NodeState::Starting).await?;
		if let Err(e) = self.prepare().await {
			self.lifecycle.set_state(NodeState::Failed).await?;
			return Err(e);
		}

		let mut tasks = self.tasks.lock().await;
		let sessions = self.sessions.clone();
		let shutdown = self.lifecycle.subscribe_shutdown();
		tasks.spawn(async move {
			if let Err(e) = sessions.run(shutdown).await {
				error!("Session manager stopped: {}", e);
			}
		});
		let batcher = self.batcher.clone();
		let shutdown = self.lifecycle.subscribe_shutdown();
		tasks.spawn(async move {
			if let Err(e) = batcher.run(shutdown).await {
				error!("Settlement batcher stopped: {}", e);
			}
		});
		let orchestrator = self.orchestrator.clone();
		let shutdown = self.lifecycle.subscribe_shutdown();
		tasks.spawn(async move {
			if let Err(e) = orchestrator.run(shutdown).await {
				error!("Transfer orchestrator stopped: {}", e);
			}
		});
		drop(tasks);

		self.lifecycle.set_state(NodeState::Running).await?;
		info!(
			node = %self.config.node.name,
			node_id = %self.config.node.node_id,
			"Teleport node started"
		);
		Ok(())
	}

	async fn prepare(&self) -> Result<(), CoreError> {
		self.orchestrator.load().await?;
		if self.config.node.dev_mode && self.ensure_signing_key().await? {
			info!("Generated development signing key");
		}
		Ok(())
	}

	/// Signals shutdown and waits for the background loops to drain.
	pub async fn shutdown(&self) -> Result<(), CoreError> {
		self.lifecycle.set_state(NodeState::Stopping).await?;
		self.lifecycle.signal_shutdown();
		let mut tasks = self.tasks.lock().await;
		while let Some(joined) = tasks.join_next().await {
			if let Err(e) = joined {
				warn!("Background task ended abnormally: {}", e);
			}
		}
		self.lifecycle.set_state(NodeState::Stopped).await?;
		info!("Teleport node stopped");
		Ok(())
	}

	/// Runs key generation for the signing key unless it already exists.
	/// Returns whether a key was generated.
	pub async fn ensure_signing_key(&self) -> Result<bool, CoreError> {
		let threshold = &self.config.threshold;
		let key_id = threshold.signing_key_id;
		if self.sessions.group_key(&key_id).await?.is_some() {
			return Ok(false);
		}
		let session_id = self
			.sessions
			.start_session(SessionRequest::KeyGen {
				key_id,
				participants: threshold.participants.clone(),
				threshold: threshold.threshold,
			})
			.await?;

		let deadline = tokio::time::Instant::now() + threshold.session_timeout();
		loop {
			let (_, state) = self.sessions.get_result(session_id).await?;
			match state {
				SessionState::Completed => return Ok(true),
				state if state.is_terminal() => {
					let reason = self
						.sessions
						.session(session_id)
						.await
						.and_then(|info| info.error)
						.unwrap_or_default();
					return Err(CoreError::Configuration(format!(
						"signing key generation ended {}: {}",
						state, reason
					)));
				},
				_ if tokio::time::Instant::now() >= deadline => {
					return Err(CoreError::Configuration(format!(
						"signing key generation {} did not finish",
						session_id
					)));
				},
				_ => tokio::time::sleep(Duration::from_millis(20)).await,
			}
		}
	}

	/// Worst of the session manager and orchestrator health.
	pub async fn health_status(&self) -> HealthStatus {
		let sessions = self.sessions.health_status().await;
		let transfers = self.orchestrator.health_status().await;
		sessions.max(transfers)
	}

	pub async fn stats(&self) -> NodeStats {
		NodeStats {
			health: self.health_status().await,
			threshold: self.sessions.stats().await,
			settlement: self.batcher.stats().await,
			orchestrator: self.orchestrator.stats().await,
		}
	}

	pub async fn state(&self) -> NodeState {
		self.lifecycle.state().await
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}

	pub fn events(&self) -> &EventBus {
		&self.events
	}

	pub fn sessions(&self) -> &ThresholdSessionManager {
		&self.sessions
	}

	pub fn batcher(&self) -> &SettlementBatcher {
		&self.batcher
	}

	pub fn orchestrator(&self) -> &TransferOrchestrator {
		&self.orchestrator
	}

	pub fn applier(&self) -> &BlockOperationApplier {
		&self.applier
	}

	pub fn validators(&self) -> &Arc<dyn ValidatorSet> {
		&self.validators
	}
}

/// Assembles a [`TeleportNode`] from configuration and collaborators.
///
/// Collaborators that are not provided fall back to the in-process
/// implementations from `teleport-chains` when `node.dev_mode` is set;
/// otherwise building fails.
pub struct NodeBuilder {
	config: Config,
	storage: Option<StorageService>,
	settlement_chain: Option<Arc<dyn SettlementChainClient>>,
	execution_chains: Vec<Arc<dyn ExecutionChainClient>>,
	validators: Option<Arc<dyn ValidatorSet>>,
	proofs: Option<(Arc<dyn ProofVerifier>, Arc<dyn ProofGenerator>, String)>,
	transport: Option<Arc<dyn RoundTransport>>,
	authenticator: Option<Arc<dyn IntentAuthenticator>>,
}

impl NodeBuilder {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			storage: None,
			settlement_chain: None,
			execution_chains: Vec::new(),
			validators: None,
			proofs: None,
			transport: None,
			authenticator: None,
		}
	}

	pub fn with_storage(mut self, storage: StorageService) -> Self {
		self.storage = Some(storage);
		self
	}

	pub fn with_settlement_chain(mut self, client: Arc<dyn SettlementChainClient>) -> Self {
		self.settlement_chain = Some(client);
		self
	}

	pub fn with_execution_chain(mut self, client: Arc<dyn ExecutionChainClient>) -> Self {
		self.execution_chains.push(client);
		self
	}

	pub fn with_validator_set(mut self, validators: Arc<dyn ValidatorSet>) -> Self {
		self.validators = Some(validators);
		self
	}

	pub fn with_proof_system(
		mut self,
		verifier: Arc<dyn ProofVerifier>,
		generator: Arc<dyn ProofGenerator>,
		tag: impl Into<String>,
	) -> Self {
		self.proofs = Some((verifier, generator, tag.into()));
		self
	}

	pub fn with_transport(mut self, transport: Arc<dyn RoundTransport>) -> Self {
		self.transport = Some(transport);
		self
	}

	pub fn with_authenticator(mut self, authenticator: Arc<dyn IntentAuthenticator>) -> Self {
		self.authenticator = Some(authenticator);
		self
	}

	pub fn build(self) -> Result<TeleportNode, CoreError> {
		let config = self.config;
		validate_config(&config).map_err(|e| CoreError::Configuration(e.to_string()))?;
		let dev = config.node.dev_mode;
		let missing = |what: &str| {
			CoreError::Configuration(format!("{} not provided and dev_mode is off", what))
		};

		let storage = Arc::new(match self.storage {
			Some(storage) => storage,
			None => match config.storage.backend {
				StorageBackend::Memory => StorageService::new(Box::new(MemoryStorage::new())),
				StorageBackend::File => {
					StorageService::new(Box::new(FileStorage::new(config.storage.path.clone())))
				},
			},
		});

		let chains = &config.chains;
		let settlement_chain: Arc<dyn SettlementChainClient> = match self.settlement_chain {
			Some(client) => client,
			None if dev => Arc::new(LocalSettlementChain::new(chains.settlement_chain.clone())),
			None => return Err(missing("settlement chain client")),
		};

		let mut registry = ChainRegistry::new();
		for client in self.execution_chains {
			registry
				.register(client)
				.map_err(|e| CoreError::Configuration(e.to_string()))?;
		}
		if dev {
			let expected = chains
				.execution_chains
				.iter()
				.chain(std::iter::once(&chains.staking_chain));
			for chain_id in expected {
				if registry.get(chain_id).is_none() {
					registry
						.register(Arc::new(LocalExecutionChain::new(chain_id.clone())))
						.map_err(|e| CoreError::Configuration(e.to_string()))?;
				}
			}
		}

		let validators: Arc<dyn ValidatorSet> = match self.validators {
			Some(validators) => validators,
			None if dev => Arc::new(InMemoryValidatorSet::new()),
			None => return Err(missing("validator set")),
		};
		let (verifier, generator, proof_system) = match self.proofs {
			Some(proofs) => proofs,
			None if dev => {
				let system = Arc::new(DigestProofSystem::new());
				(
					system.clone() as Arc<dyn ProofVerifier>,
					system as Arc<dyn ProofGenerator>,
					PROOF_SYSTEM.to_string(),
				)
			},
			None => return Err(missing("proof system")),
		};
		let transport: Arc<dyn RoundTransport> = match self.transport {
			Some(transport) => transport,
			None if dev => Arc::new(InMemoryTransport::new()),
			None => return Err(missing("round transport")),
		};
		let authenticator = self
			.authenticator
			.unwrap_or_else(|| Arc::new(Ed25519IntentAuthenticator));

		let events = EventBus::new(config.node.event_capacity);
		let sessions = ThresholdSessionManager::new(
			config.threshold.clone(),
			storage.clone(),
			transport,
			events.clone(),
		);
		let signer = ThresholdSigner::new(sessions.clone(), config.threshold.signing_key_id);
		let batcher = SettlementBatcher::new(
			config.settlement.clone(),
			settlement_chain,
			verifier,
			Arc::new(signer),
			storage.clone(),
			events.clone(),
		);
		let orchestrator = TransferOrchestrator::new(
			config.orchestrator.clone(),
			OrchestratorDeps {
				chains: config.chains.clone(),
				batcher: batcher.clone(),
				sessions: sessions.clone(),
				proofs: generator,
				proof_system,
				validators: validators.clone(),
				authenticator,
				execution_chains: Arc::new(registry),
				storage: storage.clone(),
				events: events.clone(),
			},
		);
		let applier = BlockOperationApplier::new(
			orchestrator.clone(),
			sessions.clone(),
			batcher.clone(),
			validators.clone(),
			storage.clone(),
		);

		Ok(TeleportNode {
			config,
			storage,
			events,
			lifecycle: Lifecycle::new(),
			sessions,
			batcher,
			orchestrator,
			applier,
			validators,
			tasks: Mutex::new(JoinSet::new()),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use teleport_config::ConfigLoader;

	pub(crate) const CONFIG: &str = r#"
[node]
node_id = "0101010101010101010101010101010101010101"
dev_mode = true

[chains]
settlement_chain = "x-chain"
staking_chain = "p-chain"
execution_chains = ["c-chain", "d-chain"]
temporary_holder = "0x7e1e"

[threshold]
participants = [
	"0101010101010101010101010101010101010101",
	"0202020202020202020202020202020202020202",
	"0303030303030303030303030303030303030303",
]
threshold = 2
round_timeout_ms = 500
session_timeout_secs = 5

[settlement]
batch_size = 100
batch_interval_ms = 60000

[orchestrator]
sweep_interval_ms = 50
busy_threshold = 2
overload_threshold = 4
"#;

	pub(crate) fn config() -> Config {
		ConfigLoader::new().parse(CONFIG).unwrap()
	}

	#[test]
	fn test_build_requires_collaborators_outside_dev_mode() {
		let mut config = config();
		config.node.dev_mode = false;
		let err = NodeBuilder::new(config).build().err().unwrap();
		assert!(err.to_string().contains("settlement chain client"));
	}

	#[test]
	fn test_build_rejects_invalid_config() {
		let mut config = config();
		config.settlement.batch_size = 0;
		assert!(matches!(
			NodeBuilder::new(config).build(),
			Err(CoreError::Configuration(_))
		));
	}

	#[tokio::test]
	async fn test_start_generates_signing_key_and_stops() {
		let node = NodeBuilder::new(config()).build().unwrap();
		node.start().await.unwrap();
		assert_eq!(node.state().await, NodeState::Running);
		let key_id = node.config().threshold.signing_key_id;
		assert!(node.sessions().group_key(&key_id).await.unwrap().is_some());
		assert!(!node.ensure_signing_key().await.unwrap());
		assert_eq!(node.health_status().await, HealthStatus::Healthy);

		node.shutdown().await.unwrap();
		assert_eq!(node.state().await, NodeState::Stopped);
	}

	#[tokio::test]
	async fn test_file_backend_persists_signing_key() {
		let dir = tempfile::tempdir().unwrap();
		let mut config = config();
		config.storage.backend = StorageBackend::File;
		config.storage.path = dir.path().to_path_buf();
		let key_id = config.threshold.signing_key_id;

		let node = NodeBuilder::new(config.clone()).build().unwrap();
		assert!(node.ensure_signing_key().await.unwrap());

		let restarted = NodeBuilder::new(config).build().unwrap();
		assert!(restarted.sessions().group_key(&key_id).await.unwrap().is_some());
		assert!(!restarted.ensure_signing_key().await.unwrap());
	}
}
