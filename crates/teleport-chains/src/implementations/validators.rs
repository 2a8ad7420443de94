//! In-memory validator set.

use async_trait::async_trait;
use dashmap::DashMap;
use teleport_types::{ChainError, Id, NodeId, StakeWindow, ValidatorSet};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorEntry {
	pub weight: u64,
	pub window: StakeWindow,
	/// Staked NFT backing this validator, if any.
	pub nft: Option<Id>,
}

#[derive(Default)]
pub struct InMemoryValidatorSet {
	validators: DashMap<NodeId, ValidatorEntry>,
}

impl InMemoryValidatorSet {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, node_id: &NodeId) -> Option<ValidatorEntry> {
		self.validators.get(node_id).map(|e| e.clone())
	}

	pub fn total_weight(&self) -> u64 {
		self.validators.iter().map(|e| e.weight).sum()
	}

	fn insert(&self, node_id: NodeId, entry: ValidatorEntry) -> Result<(), ChainError> {
		match self.validators.entry(node_id) {
			dashmap::mapref::entry::Entry::Occupied(_) => Err(ChainError::Rejected(format!(
				"validator {} already registered",
				node_id
			))),
			dashmap::mapref::entry::Entry::Vacant(slot) => {
				slot.insert(entry);
				Ok(())
			}
		}
	}
}

#[async_trait]
impl ValidatorSet for InMemoryValidatorSet {
	async fn add_validator(
		&self,
		node_id: NodeId,
		weight: u64,
		window: StakeWindow,
	) -> Result<(), ChainError> {
		self.insert(
			node_id,
			ValidatorEntry {
				weight,
				window,
				nft: None,
			},
		)?;
		info!("Added validator {} with weight {}", node_id, weight);
		Ok(())
	}

	async fn remove_validator(&self, node_id: NodeId) -> Result<(), ChainError> {
		self.validators
			.remove(&node_id)
			.map(|_| ())
			.ok_or_else(|| ChainError::NotFound(format!("validator {}", node_id)))
	}

	async fn update_validator(&self, node_id: NodeId, weight: u64) -> Result<(), ChainError> {
		let mut entry = self
			.validators
			.get_mut(&node_id)
			.ok_or_else(|| ChainError::NotFound(format!("validator {}", node_id)))?;
		entry.weight = weight;
		Ok(())
	}

	async fn add_nft_validator(
		&self,
		node_id: NodeId,
		nft_asset_id: Id,
		weight: u64,
		window: StakeWindow,
	) -> Result<(), ChainError> {
		self.insert(
			node_id,
			ValidatorEntry {
				weight,
				window,
				nft: Some(nft_asset_id),
			},
		)?;
		info!("Added NFT validator {} backed by {}", node_id, nft_asset_id);
		Ok(())
	}

	async fn remove_nft_validator(
		&self,
		node_id: NodeId,
		nft_asset_id: Id,
	) -> Result<(), ChainError> {
		let removed = self
			.validators
			.remove_if(&node_id, |_, entry| entry.nft == Some(nft_asset_id));
		match removed {
			Some(_) => Ok(()),
			None => Err(ChainError::NotFound(format!(
				"NFT validator {} backed by {}",
				node_id, nft_asset_id
			))),
		}
	}

	async fn validator_count(&self) -> Result<usize, ChainError> {
		Ok(self.validators.len())
	}
}
