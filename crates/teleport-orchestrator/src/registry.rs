//! Asset registry with location tracking and non-fungible reservations.

use crate::error::{OrchestratorError, ValidationError};
use dashmap::DashMap;
use std::sync::Arc;
use teleport_storage::{Namespace, StorageService};
use teleport_types::{ChainId, Id, TeleportAsset};
use tracing::debug;

/// Maps asset identifiers to their descriptor and current chain.
///
/// Every mutation is written through to the `assets` keyspace.
pub struct AssetRegistry {
	assets: DashMap<Id, TeleportAsset>,
	storage: Arc<StorageService>,
}

impl AssetRegistry {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self {
			assets: DashMap::new(),
			storage,
		}
	}

	/// Loads persisted assets. Returns how many were loaded.
	pub async fn load(&self) -> Result<usize, OrchestratorError> {
		let assets: Vec<TeleportAsset> = self.storage.load_all(Namespace::Assets).await?;
		let count = assets.len();
		for asset in assets {
			self.assets.insert(asset.id, asset);
		}
		Ok(count)
	}

	pub async fn register(&self, asset: TeleportAsset) -> Result<(), OrchestratorError> {
		self.persist(&asset).await?;
		debug!(asset_id = %asset.id, symbol = %asset.symbol, "Registered asset");
		self.assets.insert(asset.id, asset);
		Ok(())
	}

	pub fn get(&self, asset_id: &Id) -> Option<TeleportAsset> {
		self.assets.get(asset_id).map(|a| a.clone())
	}

	pub fn list(&self) -> Vec<TeleportAsset> {
		self.assets.iter().map(|a| a.value().clone()).collect()
	}

	/// Marks a non-fungible asset as held by an active transfer.
	pub async fn reserve(&self, asset_id: &Id) -> Result<(), OrchestratorError> {
		let updated = {
			let mut asset = self
				.assets
				.get_mut(asset_id)
				.ok_or(ValidationError::UnknownAsset(*asset_id))?;
			if asset.in_flight {
				return Err(ValidationError::AssetInFlight(*asset_id).into());
			}
			asset.in_flight = true;
			asset.clone()
		};
		self.persist(&updated).await
	}

	/// Drops the reservation of a transfer that did not complete.
	pub async fn release(&self, asset_id: &Id) -> Result<(), OrchestratorError> {
		self.update(asset_id, |asset| asset.in_flight = false).await
	}

	/// Records that the asset now lives on `chain` and clears any reservation.
	pub async fn relocate(&self, asset_id: &Id, chain: ChainId) -> Result<(), OrchestratorError> {
		self.update(asset_id, |asset| {
			asset.current_chain = chain;
			asset.in_flight = false;
		})
		.await
	}

	async fn update(
		&self,
		asset_id: &Id,
		apply: impl FnOnce(&mut TeleportAsset),
	) -> Result<(), OrchestratorError> {
		let updated = {
			let Some(mut asset) = self.assets.get_mut(asset_id) else {
				return Err(ValidationError::UnknownAsset(*asset_id).into());
			};
			apply(asset.value_mut());
			asset.clone()
		};
		self.persist(&updated).await
	}

	async fn persist(&self, asset: &TeleportAsset) -> Result<(), OrchestratorError> {
		self.storage
			.store(Namespace::Assets, &asset.id.to_string(), asset)
			.await?;
		Ok(())
	}
}
