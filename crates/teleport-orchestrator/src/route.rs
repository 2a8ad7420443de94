//! Classification of validated intents into transfer paths.

use crate::error::ValidationError;
use chrono::{Duration, Utc};
use teleport_config::ChainsConfig;
use teleport_types::{
	AssetType, IntentType, NodeId, StakeWindow, TeleportAsset, TeleportIntent, TransferRoute,
};

/// Intent metadata keys read by the stake path.
pub mod stake_keys {
	pub const NODE_ID: &str = "node_id";
	pub const STAKE_AMOUNT: &str = "stake_amount";
	pub const DURATION_SECS: &str = "stake_duration_secs";
	pub const DELEGATION_FEE: &str = "delegation_fee";
}

/// Basis points ceiling of a delegation fee.
const MAX_DELEGATION_FEE: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StakeParams {
	pub node_id: NodeId,
	pub stake_amount: u64,
	pub window: StakeWindow,
	pub delegation_fee: u32,
}

/// Handler selected for a transfer, resolved once at validation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
	/// Mint on the settlement chain for the recipient.
	Mint,
	/// Burn from the sender on the settlement chain.
	Burn,
	/// Mint to the temporary holder, then burn towards the destination.
	Transit,
	/// Lock a validator NFT and bind it to a validator node.
	Stake(StakeParams),
}

impl Dispatch {
	pub fn route(&self) -> TransferRoute {
		match self {
			Dispatch::Mint => TransferRoute::Mint,
			Dispatch::Burn => TransferRoute::Burn,
			Dispatch::Transit => TransferRoute::Transit,
			Dispatch::Stake(_) => TransferRoute::Stake,
		}
	}
}

/// Picks the path for `intent` moving `asset`.
///
/// Swaps are rejected and stake intents must target the staking chain. Any
/// transfer to the staking chain is a stake and requires a validator NFT.
/// Otherwise the settlement chain's position decides between mint, burn and
/// transit.
pub fn resolve(
	intent: &TeleportIntent,
	asset: &TeleportAsset,
	chains: &ChainsConfig,
) -> Result<Dispatch, ValidationError> {
	let (source, dest) = (intent.source_chain(), intent.dest_chain());
	match intent.intent_type {
		IntentType::Transfer | IntentType::Bridge => {},
		IntentType::Stake if dest == &chains.staking_chain => {},
		IntentType::Stake => return Err(ValidationError::StakeTarget(dest.clone())),
		IntentType::Swap => return Err(ValidationError::UnsupportedIntentType(IntentType::Swap)),
	}
	if dest == &chains.staking_chain {
		if asset.asset_type != AssetType::ValidatorNft {
			return Err(ValidationError::NotValidatorNft(asset.asset_type));
		}
		return stake_params(intent).map(Dispatch::Stake);
	}
	if dest == &chains.settlement_chain {
		Ok(Dispatch::Mint)
	} else if source == &chains.settlement_chain {
		Ok(Dispatch::Burn)
	} else {
		Ok(Dispatch::Transit)
	}
}

fn stake_params(intent: &TeleportIntent) -> Result<StakeParams, ValidationError> {
	let field = |key: &str| {
		intent
			.metadata
			.get(key)
			.ok_or_else(|| ValidationError::StakeParams(format!("missing {}", key)))
	};
	let invalid = |key: &str| ValidationError::StakeParams(format!("invalid {}", key));

	let node_id: NodeId = field(stake_keys::NODE_ID)?
		.parse()
		.map_err(|_| invalid(stake_keys::NODE_ID))?;
	let stake_amount: u64 = field(stake_keys::STAKE_AMOUNT)?
		.parse()
		.map_err(|_| invalid(stake_keys::STAKE_AMOUNT))?;
	let duration: i64 = field(stake_keys::DURATION_SECS)?
		.parse()
		.map_err(|_| invalid(stake_keys::DURATION_SECS))?;
	let delegation_fee: u32 = match intent.metadata.get(stake_keys::DELEGATION_FEE) {
		Some(fee) => fee.parse().map_err(|_| invalid(stake_keys::DELEGATION_FEE))?,
		None => 0,
	};

	if stake_amount == 0 {
		return Err(invalid(stake_keys::STAKE_AMOUNT));
	}
	if duration <= 0 {
		return Err(invalid(stake_keys::DURATION_SECS));
	}
	if delegation_fee > MAX_DELEGATION_FEE {
		return Err(invalid(stake_keys::DELEGATION_FEE));
	}

	let start = Utc::now();
	let end = Duration::try_seconds(duration)
		.and_then(|length| start.checked_add_signed(length))
		.ok_or_else(|| invalid(stake_keys::DURATION_SECS))?;
	Ok(StakeParams {
		node_id,
		stake_amount,
		window: StakeWindow { start, end },
		delegation_fee,
	})
}
