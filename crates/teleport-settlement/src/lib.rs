//! Settlement batcher for the UTXO settlement chain.
//!
//! Mint and burn requests are proof-checked, queued, and flushed in batches.
//! Each flushed unit becomes at most one mint and one burn transaction, signed
//! by the validator group and issued on the settlement chain.

use teleport_storage::StorageError;
use teleport_types::{ChainError, ProofError, SettlementId, SettlementStatus, SettlementType, SignerError};
use thiserror::Error;

pub mod batcher;
pub mod proof;
pub mod tx;

pub use batcher::{SettlementBatcher, SettlementStats};
pub use proof::verify_bundle;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettlementError {
	#[error("Invalid settlement request: {0}")]
	InvalidRequest(String),

	#[error("Proof verification failed: {0}")]
	Proof(#[from] ProofError),

	#[error("Insufficient balance: have {have}, need {need}")]
	InsufficientBalance { have: u64, need: u64 },

	#[error("Settlement {0} not found")]
	NotFound(SettlementId),

	#[error("Settlement {settlement_id} is a {actual} settlement, not {expected}")]
	TypeMismatch {
		settlement_id: SettlementId,
		expected: SettlementType,
		actual: SettlementType,
	},

	#[error("Settlement {settlement_id} is already {status}")]
	AlreadyFinal {
		settlement_id: SettlementId,
		status: SettlementStatus,
	},

	#[error("Chain error: {0}")]
	Chain(#[from] ChainError),

	#[error("Signing error: {0}")]
	Signer(#[from] SignerError),

	#[error("Encoding error: {0}")]
	Encoding(String),

	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<StorageError> for SettlementError {
	fn from(err: StorageError) -> Self {
		Self::Storage(err.to_string())
	}
}
