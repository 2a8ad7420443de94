use teleport_settlement::SettlementError;
use teleport_storage::StorageError;
use teleport_threshold::ThresholdError;
use teleport_types::{
	AssetType, ChainError, ChainId, Id, IntentType, InvalidTransition, ProofError, TransferId,
};
use thiserror::Error;

/// Reasons an intent is rejected before any transfer record exists.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
	#[error("Intent {0} expired")]
	Expired(Id),

	#[error("Amount must be greater than zero")]
	ZeroAmount,

	#[error("Intent signature does not verify against the sender key")]
	InvalidSignature,

	#[error("Unknown asset {0}")]
	UnknownAsset(Id),

	#[error("Unknown chain {0}")]
	UnknownChain(ChainId),

	#[error("Source and destination are both {0}")]
	SameChain(ChainId),

	#[error("Asset {asset_id} is on {actual}, not {expected}")]
	WrongLocation {
		asset_id: Id,
		expected: ChainId,
		actual: ChainId,
	},

	#[error("Non-fungible assets move one unit at a time, got {0}")]
	NonFungibleAmount(u64),

	#[error("only validator NFTs can be transferred to the staking chain, got {0:?}")]
	NotValidatorNft(AssetType),

	#[error("Intent type {0:?} is not supported")]
	UnsupportedIntentType(IntentType),

	#[error("Stake intents must target the staking chain, got {0}")]
	StakeTarget(ChainId),

	#[error("Invalid stake parameters: {0}")]
	StakeParams(String),

	#[error("Transit amount {amount} exceeds risk limit {limit}")]
	TransitRiskLimit { amount: u64, limit: u64 },

	#[error("Asset {0} is already in flight")]
	AssetInFlight(Id),

	#[error("Intent {0} was already processed")]
	Duplicate(Id),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
	#[error("Validation failed: {0}")]
	Validation(#[from] ValidationError),

	#[error("Transfer {0} not found")]
	NotFound(TransferId),

	#[error("Settlement for transfer {transfer_id} rejected: {source}")]
	Settlement {
		transfer_id: TransferId,
		source: SettlementError,
	},

	#[error("Proof generation for transfer {transfer_id} failed: {source}")]
	Proof {
		transfer_id: TransferId,
		source: ProofError,
	},

	#[error("Chain call for transfer {transfer_id} failed: {source}")]
	Chain {
		transfer_id: TransferId,
		source: ChainError,
	},

	#[error("Threshold session for transfer {transfer_id} failed: {source}")]
	Threshold {
		transfer_id: TransferId,
		source: ThresholdError,
	},

	#[error(transparent)]
	Transition(#[from] InvalidTransition),

	#[error("Intent pool is full ({max} intents)")]
	PoolFull { max: usize },

	#[error("Validator NFT {0} not found")]
	UnknownValidatorNft(Id),

	#[error("Validator NFT {0} is already staked")]
	ValidatorNftStaked(Id),

	#[error("Validator set error: {0}")]
	ValidatorSet(#[from] ChainError),

	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<StorageError> for OrchestratorError {
	fn from(err: StorageError) -> Self {
		Self::Storage(err.to_string())
	}
}
