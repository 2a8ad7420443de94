//! In-process account-model execution chain used for proof context.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use teleport_types::{ChainError, ChainId, ExecutionChainClient, Id, NodeId};
use tokio::sync::RwLock;

pub struct LocalExecutionChain {
	chain_id: ChainId,
	height: AtomicU64,
	validators: RwLock<Vec<(NodeId, u64)>>,
	receipts: DashMap<Id, Vec<u8>>,
}

impl LocalExecutionChain {
	pub fn new(chain_id: ChainId) -> Self {
		Self {
			chain_id,
			height: AtomicU64::new(0),
			validators: RwLock::new(Vec::new()),
			receipts: DashMap::new(),
		}
	}

	/// Produces an empty block and returns the new height.
	pub fn advance(&self) -> u64 {
		self.height.fetch_add(1, Ordering::SeqCst) + 1
	}

	pub async fn set_validators(&self, validators: Vec<(NodeId, u64)>) {
		*self.validators.write().await = validators;
	}

	pub fn record_receipt(&self, tx_id: Id, receipt: Vec<u8>) {
		self.receipts.insert(tx_id, receipt);
	}
}

#[async_trait]
impl ExecutionChainClient for LocalExecutionChain {
	fn chain_id(&self) -> &ChainId {
		&self.chain_id
	}

	async fn get_height(&self) -> Result<u64, ChainError> {
		Ok(self.height.load(Ordering::SeqCst))
	}

	/// The local chain has a single subnet; `subnet_id` is ignored.
	async fn get_current_validators(
		&self,
		_subnet_id: &Id,
	) -> Result<Vec<(NodeId, u64)>, ChainError> {
		Ok(self.validators.read().await.clone())
	}

	async fn get_receipt(&self, tx_id: &Id) -> Result<Option<Vec<u8>>, ChainError> {
		Ok(self.receipts.get(tx_id).map(|r| r.clone()))
	}
}
