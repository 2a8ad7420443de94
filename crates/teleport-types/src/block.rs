//! Transactions and operations recorded in blocks.
//!
//! Transactions are staged when a block is built or verified; operations are
//! replayed exactly once when the block is accepted.

use crate::{
	serde_helpers::hex_bytes, Address, Id, NodeId, SessionId, SettlementId, TeleportIntent,
	TransferId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Staking window of a validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeWindow {
	pub start: DateTime<Utc>,
	pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockTransaction {
	TeleportIntent { intent: TeleportIntent },
	KeyGenRequest {
		key_id: Id,
		participants: Vec<NodeId>,
		threshold: usize,
	},
	ValidatorUpdate { operation: ValidatorOperation },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TeleportOperation {
	/// Mint settlement confirmed on the settlement chain.
	Mint { settlement_id: SettlementId, tx_id: Id },
	/// Burn settlement confirmed on the settlement chain.
	Burn { settlement_id: SettlementId, tx_id: Id },
	SettlementFailed {
		settlement_id: SettlementId,
		reason: String,
	},
	Refund { transfer_id: TransferId, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MpcOperation {
	KeyGenCompleted {
		session_id: SessionId,
		key_id: Id,
		#[serde(with = "hex_bytes")]
		public_key: Vec<u8>,
	},
	SignatureProduced {
		session_id: SessionId,
		#[serde(with = "hex_bytes")]
		signature: Vec<u8>,
		signers: Vec<NodeId>,
	},
	KeySharesUpdated {
		session_id: SessionId,
		key_id: Id,
		#[serde(with = "hex_bytes")]
		public_key: Vec<u8>,
	},
	SessionAborted { session_id: SessionId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidatorOperation {
	Add {
		node_id: NodeId,
		weight: u64,
		window: StakeWindow,
	},
	Remove { node_id: NodeId },
	Update { node_id: NodeId, weight: u64 },
	NftStake {
		nft_asset_id: Id,
		node_id: NodeId,
		owner: Address,
		stake_amount: u64,
		window: StakeWindow,
		delegation_fee: u32,
	},
	NftUnstake { nft_asset_id: Id },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "component", rename_all = "snake_case")]
pub enum BlockOperation {
	Teleport { op: TeleportOperation },
	Mpc { op: MpcOperation },
	Validator { op: ValidatorOperation },
}

/// Block contents relevant to the teleport subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
	pub id: Id,
	pub height: u64,
	#[serde(default)]
	pub transactions: Vec<BlockTransaction>,
	#[serde(default)]
	pub operations: Vec<BlockOperation>,
}

impl Block {
	/// Key identifying operation `index` of this block for exactly-once replay.
	pub fn operation_key(&self, index: usize) -> String {
		format!("{}:{}", self.id, index)
	}
}
