//! Configuration types for a teleport node.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use teleport_types::{Address, ChainId, Id, NodeId};

/// Complete node configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	pub node: NodeConfig,
	pub chains: ChainsConfig,
	pub threshold: ThresholdConfig,
	#[serde(default)]
	pub settlement: SettlementConfig,
	#[serde(default)]
	pub orchestrator: OrchestratorConfig,
	#[serde(default)]
	pub storage: StorageConfig,
}

/// Identity of the local node.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
	#[serde(default = "default_node_name")]
	pub name: String,
	pub node_id: NodeId,
	#[serde(default = "default_log_level")]
	pub log_level: String,
	/// Generates the signing key on start and falls back to in-process chains.
	#[serde(default)]
	pub dev_mode: bool,
	#[serde(default = "default_event_capacity")]
	pub event_capacity: usize,
}

/// Participating chains.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainsConfig {
	/// UTXO-model chain on which mints and burns settle.
	pub settlement_chain: ChainId,
	/// Chain on which validator NFTs are staked.
	pub staking_chain: ChainId,
	#[serde(default)]
	pub execution_chains: Vec<ChainId>,
	/// Settlement-chain account that holds funds between transit legs.
	pub temporary_holder: Address,
}

impl ChainsConfig {
	pub fn is_known(&self, chain: &ChainId) -> bool {
		chain == &self.settlement_chain
			|| chain == &self.staking_chain
			|| self.execution_chains.contains(chain)
	}
}

/// Threshold session manager settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThresholdConfig {
	pub participants: Vec<NodeId>,
	/// Parties this process acts for. Empty means every participant.
	#[serde(default)]
	pub local_parties: Vec<NodeId>,
	pub threshold: usize,
	/// Key used to sign settlement transactions and release authorizations.
	#[serde(default = "default_signing_key_id")]
	pub signing_key_id: Id,
	#[serde(default = "default_round_timeout_ms")]
	pub round_timeout_ms: u64,
	#[serde(default = "default_session_timeout_secs")]
	pub session_timeout_secs: u64,
	#[serde(default = "default_sign_timeout_ms")]
	pub sign_timeout_ms: u64,
	#[serde(default = "default_max_concurrent_sessions")]
	pub max_concurrent_sessions: usize,
	#[serde(default = "default_sweep_interval_ms")]
	pub sweep_interval_ms: u64,
}

impl ThresholdConfig {
	pub fn round_timeout(&self) -> Duration {
		Duration::from_millis(self.round_timeout_ms)
	}

	pub fn session_timeout(&self) -> Duration {
		Duration::from_secs(self.session_timeout_secs)
	}

	pub fn sign_timeout(&self) -> Duration {
		Duration::from_millis(self.sign_timeout_ms)
	}

	pub fn sweep_interval(&self) -> Duration {
		Duration::from_millis(self.sweep_interval_ms)
	}

	pub fn local_parties(&self) -> Vec<NodeId> {
		if self.local_parties.is_empty() {
			self.participants.clone()
		} else {
			self.local_parties.clone()
		}
	}
}

/// What happens to a settlement group whose transaction is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
	/// Every settlement of the group is marked failed.
	#[default]
	AllOrNothing,
	/// Each settlement of the group is resubmitted once on its own.
	Isolate,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SettlementConfig {
	#[serde(default = "default_batch_size")]
	pub batch_size: usize,
	#[serde(default = "default_batch_interval_ms")]
	pub batch_interval_ms: u64,
	#[serde(default)]
	pub failure_policy: FailurePolicy,
	/// Finished settlements kept in memory for status lookups.
	#[serde(default = "default_history_limit")]
	pub history_limit: usize,
}

impl SettlementConfig {
	pub fn batch_interval(&self) -> Duration {
		Duration::from_millis(self.batch_interval_ms)
	}
}

impl Default for SettlementConfig {
	fn default() -> Self {
		Self {
			batch_size: default_batch_size(),
			batch_interval_ms: default_batch_interval_ms(),
			failure_policy: FailurePolicy::default(),
			history_limit: default_history_limit(),
		}
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
	#[serde(default = "default_sweep_interval_ms")]
	pub sweep_interval_ms: u64,
	/// How long terminal transfers stay queryable.
	#[serde(default = "default_retention_secs")]
	pub retention_secs: u64,
	#[serde(default = "default_busy_threshold")]
	pub busy_threshold: usize,
	#[serde(default = "default_overload_threshold")]
	pub overload_threshold: usize,
	#[serde(default = "default_max_pool_size")]
	pub max_pool_size: usize,
	/// Transit transfers above this amount are rejected.
	#[serde(default)]
	pub transit_risk_limit: Option<u64>,
}

impl OrchestratorConfig {
	pub fn sweep_interval(&self) -> Duration {
		Duration::from_millis(self.sweep_interval_ms)
	}

	pub fn retention(&self) -> Duration {
		Duration::from_secs(self.retention_secs)
	}
}

impl Default for OrchestratorConfig {
	fn default() -> Self {
		Self {
			sweep_interval_ms: default_sweep_interval_ms(),
			retention_secs: default_retention_secs(),
			busy_threshold: default_busy_threshold(),
			overload_threshold: default_overload_threshold(),
			max_pool_size: default_max_pool_size(),
			transit_risk_limit: None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
	#[default]
	Memory,
	File,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	#[serde(default)]
	pub backend: StorageBackend,
	#[serde(default = "default_storage_path")]
	pub path: PathBuf,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			backend: StorageBackend::default(),
			path: default_storage_path(),
		}
	}
}

fn default_node_name() -> String {
	"teleport-node".to_string()
}

fn default_log_level() -> String {
	"info".to_string()
}

fn default_event_capacity() -> usize {
	1024
}

fn default_signing_key_id() -> Id {
	Id::hash_of(&[b"teleport/settlement-signing-key"])
}

fn default_round_timeout_ms() -> u64 {
	5_000
}

fn default_session_timeout_secs() -> u64 {
	60
}

fn default_sign_timeout_ms() -> u64 {
	20_000
}

fn default_max_concurrent_sessions() -> usize {
	64
}

fn default_sweep_interval_ms() -> u64 {
	1_000
}

fn default_batch_size() -> usize {
	16
}

fn default_batch_interval_ms() -> u64 {
	500
}

fn default_history_limit() -> usize {
	4_096
}

fn default_retention_secs() -> u64 {
	3_600
}

fn default_busy_threshold() -> usize {
	256
}

fn default_overload_threshold() -> usize {
	1_024
}

fn default_max_pool_size() -> usize {
	10_000
}

fn default_storage_path() -> PathBuf {
	PathBuf::from("./data/teleport")
}
