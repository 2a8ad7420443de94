//! Registry of execution-chain clients.
//!
//! The orchestrator looks up clients by chain ID when it assembles proof
//! context for a transfer. Clients are shared as `Arc<dyn ExecutionChainClient>`.

use std::collections::HashMap;
use std::sync::Arc;
use teleport_types::{ChainError, ChainId, ExecutionChainClient};
use tracing::info;

#[derive(Default)]
pub struct ChainRegistry {
	clients: HashMap<ChainId, Arc<dyn ExecutionChainClient>>,
}

impl ChainRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a client under its own chain ID.
	///
	/// # Errors
	///
	/// Returns an error if a client for the same chain is already registered.
	pub fn register(&mut self, client: Arc<dyn ExecutionChainClient>) -> Result<(), ChainError> {
		let chain_id = client.chain_id().clone();
		if self.clients.contains_key(&chain_id) {
			return Err(ChainError::Rejected(format!(
				"Chain {} already registered",
				chain_id
			)));
		}
		info!("Registering execution chain client for {}", chain_id);
		self.clients.insert(chain_id, client);
		Ok(())
	}

	pub fn get(&self, chain_id: &ChainId) -> Option<Arc<dyn ExecutionChainClient>> {
		self.clients.get(chain_id).cloned()
	}

	pub fn get_required(
		&self,
		chain_id: &ChainId,
	) -> Result<Arc<dyn ExecutionChainClient>, ChainError> {
		self.get(chain_id)
			.ok_or_else(|| ChainError::NotFound(format!("Chain {} not configured", chain_id)))
	}

	/// Registered chain IDs, in no particular order.
	pub fn chains(&self) -> Vec<ChainId> {
		self.clients.keys().cloned().collect()
	}
}
