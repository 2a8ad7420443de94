//! Asset descriptors and validator-NFT records.

use crate::{Address, ChainId, Id, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of asset being teleported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
	Fungible,
	Nft,
	SemiNft,
	ValidatorNft,
}

impl AssetType {
	/// Non-fungible assets move as a single indivisible unit.
	pub fn is_non_fungible(&self) -> bool {
		matches!(self, AssetType::Nft | AssetType::ValidatorNft)
	}
}

/// Locates an asset on a specific chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetIdentifier {
	pub chain: ChainId,
	pub asset_id: Id,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token_id: Option<Id>,
}

impl AssetIdentifier {
	pub fn new(chain: ChainId, asset_id: Id) -> Self {
		Self {
			chain,
			asset_id,
			token_id: None,
		}
	}

	pub fn with_token(mut self, token_id: Id) -> Self {
		self.token_id = Some(token_id);
		self
	}
}

/// Registry entry for a teleportable asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeleportAsset {
	pub id: Id,
	pub asset_type: AssetType,
	pub symbol: String,
	pub origin_chain: ChainId,
	/// Chain currently holding the canonical representation.
	pub current_chain: ChainId,
	/// Set while a transfer holds a reservation on a non-fungible asset.
	#[serde(default)]
	pub in_flight: bool,
}

/// A staked NFT backing a validator identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorNft {
	pub nft_asset_id: Id,
	pub node_id: NodeId,
	pub owner: Address,
	pub stake_amount: u64,
	pub stake_start: DateTime<Utc>,
	pub stake_end: DateTime<Utc>,
	/// Delegation fee in basis points.
	pub delegation_fee: u32,
	pub active: bool,
}

impl ValidatorNft {
	pub fn stake_window_secs(&self) -> i64 {
		(self.stake_end - self.stake_start).num_seconds()
	}
}
