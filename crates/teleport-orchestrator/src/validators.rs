//! Registry of staked validator NFTs.

use crate::error::OrchestratorError;
use dashmap::DashMap;
use std::sync::Arc;
use teleport_storage::{Namespace, StorageService};
use teleport_types::{Id, NodeId, ValidatorNft};
use tracing::info;

/// Validator NFTs keyed by NFT asset ID. Records are deactivated on unstake,
/// never deleted.
pub struct ValidatorNftRegistry {
	nfts: DashMap<Id, ValidatorNft>,
	storage: Arc<StorageService>,
}

impl ValidatorNftRegistry {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self {
			nfts: DashMap::new(),
			storage,
		}
	}

	pub async fn load(&self) -> Result<usize, OrchestratorError> {
		let nfts: Vec<ValidatorNft> = self.storage.load_all(Namespace::ValidatorNfts).await?;
		let count = nfts.len();
		for nft in nfts {
			self.nfts.insert(nft.nft_asset_id, nft);
		}
		Ok(count)
	}

	/// Registers a newly staked NFT. An inactive record for the same NFT is
	/// replaced; an active one is an error.
	pub async fn register(&self, nft: ValidatorNft) -> Result<(), OrchestratorError> {
		if self.get(&nft.nft_asset_id).is_some_and(|n| n.active) {
			return Err(OrchestratorError::ValidatorNftStaked(nft.nft_asset_id));
		}
		self.persist(&nft).await?;
		info!(
			nft_asset_id = %nft.nft_asset_id,
			node_id = ?nft.node_id,
			stake = nft.stake_amount,
			"Registered validator NFT"
		);
		self.nfts.insert(nft.nft_asset_id, nft);
		Ok(())
	}

	pub fn get(&self, nft_asset_id: &Id) -> Option<ValidatorNft> {
		self.nfts.get(nft_asset_id).map(|n| n.clone())
	}

	/// Active NFT bound to `node_id`, if any.
	pub fn by_node(&self, node_id: &NodeId) -> Option<ValidatorNft> {
		self.nfts
			.iter()
			.find(|n| n.active && &n.node_id == node_id)
			.map(|n| n.value().clone())
	}

	pub fn active(&self) -> Vec<ValidatorNft> {
		self.nfts
			.iter()
			.filter(|n| n.active)
			.map(|n| n.value().clone())
			.collect()
	}

	pub async fn activate(&self, nft_asset_id: &Id) -> Result<ValidatorNft, OrchestratorError> {
		self.set_active(nft_asset_id, true).await
	}

	/// Marks the NFT unstaked and returns the updated record.
	pub async fn deactivate(&self, nft_asset_id: &Id) -> Result<ValidatorNft, OrchestratorError> {
		self.set_active(nft_asset_id, false).await
	}

	async fn set_active(
		&self,
		nft_asset_id: &Id,
		active: bool,
	) -> Result<ValidatorNft, OrchestratorError> {
		let updated = {
			let Some(mut nft) = self.nfts.get_mut(nft_asset_id) else {
				return Err(OrchestratorError::UnknownValidatorNft(*nft_asset_id));
			};
			nft.active = active;
			nft.clone()
		};
		self.persist(&updated).await?;
		Ok(updated)
	}

	async fn persist(&self, nft: &ValidatorNft) -> Result<(), OrchestratorError> {
		self.storage
			.store(Namespace::ValidatorNfts, &nft.nft_asset_id.to_string(), nft)
			.await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::{Duration, Utc};
	use teleport_types::Address;

	fn nft() -> ValidatorNft {
		let now = Utc::now();
		ValidatorNft {
			nft_asset_id: Id([3; 32]),
			node_id: NodeId([7; 20]),
			owner: Address(vec![1; 32]),
			stake_amount: 2_000,
			stake_start: now,
			stake_end: now + Duration::days(14),
			delegation_fee: 200,
			active: true,
		}
	}

	#[tokio::test]
	async fn test_unstake_deactivates_without_deleting() {
		let registry = ValidatorNftRegistry::new(Arc::new(StorageService::in_memory()));
		registry.register(nft()).await.unwrap();
		assert!(registry.by_node(&NodeId([7; 20])).is_some());

		let err = registry.register(nft()).await.unwrap_err();
		assert!(matches!(err, OrchestratorError::ValidatorNftStaked(_)));

		let record = registry.deactivate(&nft().nft_asset_id).await.unwrap();
		assert!(!record.active);
		assert!(registry.get(&nft().nft_asset_id).is_some());
		assert!(registry.by_node(&NodeId([7; 20])).is_none());
		assert!(registry.active().is_empty());

		registry.activate(&nft().nft_asset_id).await.unwrap();
		assert_eq!(registry.active().len(), 1);
	}

	#[tokio::test]
	async fn test_unknown_nft() {
		let registry = ValidatorNftRegistry::new(Arc::new(StorageService::in_memory()));
		let err = registry.deactivate(&Id([1; 32])).await.unwrap_err();
		assert!(matches!(err, OrchestratorError::UnknownValidatorNft(_)));
	}
}
