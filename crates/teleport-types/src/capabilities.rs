//! Capabilities consumed by the teleport core.
//!
//! These traits are implemented by collaborators outside the core (chain
//! clients, proof systems, the validator set). Every method has a default
//! that returns a `NotImplemented` error, so partial implementations used in
//! tests fail with an assertable error instead of panicking.

use crate::{Address, ChainId, Id, NodeId, SessionId, StakeWindow, TeleportIntent, Utxo};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors reported by chain clients and the validator set.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
	#[error("Not implemented: {0}")]
	NotImplemented(&'static str),
	#[error("Transaction rejected: {0}")]
	Rejected(String),
	#[error("Not found: {0}")]
	NotFound(String),
	#[error("Unavailable: {0}")]
	Unavailable(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProofError {
	#[error("Not implemented: {0}")]
	NotImplemented(&'static str),
	#[error("Proof for circuit {circuit} is invalid: {reason}")]
	Invalid { circuit: String, reason: String },
	#[error("Unknown circuit: {0}")]
	UnknownCircuit(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignerError {
	#[error("Not implemented: {0}")]
	NotImplemented(&'static str),
	#[error("Signing timed out")]
	Timeout,
	#[error("Signing failed: {0}")]
	Failed(String),
}

/// Client for the UTXO-model settlement chain.
#[async_trait]
pub trait SettlementChainClient: Send + Sync {
	fn chain_id(&self) -> &ChainId;

	async fn get_balance(&self, _address: &Address, _asset_id: &Id) -> Result<u64, ChainError> {
		Err(ChainError::NotImplemented("get_balance"))
	}

	async fn get_utxos(&self, _addresses: &[Address]) -> Result<Vec<Utxo>, ChainError> {
		Err(ChainError::NotImplemented("get_utxos"))
	}

	/// Submits signed transaction bytes and returns the transaction ID.
	async fn issue_tx(&self, _signed_tx: &[u8]) -> Result<Id, ChainError> {
		Err(ChainError::NotImplemented("issue_tx"))
	}

	async fn get_block_by_height(&self, _height: u64) -> Result<Vec<u8>, ChainError> {
		Err(ChainError::NotImplemented("get_block_by_height"))
	}
}

/// Read-only client for an account-model execution chain.
#[async_trait]
pub trait ExecutionChainClient: Send + Sync {
	fn chain_id(&self) -> &ChainId;

	async fn get_height(&self) -> Result<u64, ChainError> {
		Err(ChainError::NotImplemented("get_height"))
	}

	async fn get_current_validators(
		&self,
		_subnet_id: &Id,
	) -> Result<Vec<(NodeId, u64)>, ChainError> {
		Err(ChainError::NotImplemented("get_current_validators"))
	}

	async fn get_receipt(&self, _tx_id: &Id) -> Result<Option<Vec<u8>>, ChainError> {
		Err(ChainError::NotImplemented("get_receipt"))
	}
}

/// Verifies opaque proofs against named circuits.
#[async_trait]
pub trait ProofVerifier: Send + Sync {
	async fn verify_proof(
		&self,
		_circuit: &str,
		_proof: &[u8],
		_public_inputs: &[u8],
	) -> Result<(), ProofError> {
		Err(ProofError::NotImplemented("verify_proof"))
	}
}

/// Produces proofs for named circuits.
#[async_trait]
pub trait ProofGenerator: Send + Sync {
	async fn generate_proof(
		&self,
		_circuit: &str,
		_public_inputs: &[u8],
	) -> Result<Vec<u8>, ProofError> {
		Err(ProofError::NotImplemented("generate_proof"))
	}
}

/// The chain's validator set.
#[async_trait]
pub trait ValidatorSet: Send + Sync {
	async fn add_validator(
		&self,
		_node_id: NodeId,
		_weight: u64,
		_window: StakeWindow,
	) -> Result<(), ChainError> {
		Err(ChainError::NotImplemented("add_validator"))
	}

	async fn remove_validator(&self, _node_id: NodeId) -> Result<(), ChainError> {
		Err(ChainError::NotImplemented("remove_validator"))
	}

	async fn update_validator(&self, _node_id: NodeId, _weight: u64) -> Result<(), ChainError> {
		Err(ChainError::NotImplemented("update_validator"))
	}

	async fn add_nft_validator(
		&self,
		_node_id: NodeId,
		_nft_asset_id: Id,
		_weight: u64,
		_window: StakeWindow,
	) -> Result<(), ChainError> {
		Err(ChainError::NotImplemented("add_nft_validator"))
	}

	async fn remove_nft_validator(
		&self,
		_node_id: NodeId,
		_nft_asset_id: Id,
	) -> Result<(), ChainError> {
		Err(ChainError::NotImplemented("remove_nft_validator"))
	}

	async fn validator_count(&self) -> Result<usize, ChainError> {
		Err(ChainError::NotImplemented("validator_count"))
	}
}

/// Result of a threshold signing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureOutcome {
	pub session_id: SessionId,
	pub signature: Vec<u8>,
}

/// Produces group signatures over arbitrary payloads.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
	async fn sign(&self, _payload: &[u8]) -> Result<SignatureOutcome, SignerError> {
		Err(SignerError::NotImplemented("sign"))
	}
}

/// Checks that an intent is signed by its sender.
pub trait IntentAuthenticator: Send + Sync {
	fn authenticate(&self, intent: &TeleportIntent) -> bool;
}

/// Load-based health of a component. Ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
	Healthy,
	Busy,
	Overloaded,
}

impl fmt::Display for HealthStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			HealthStatus::Healthy => "healthy",
			HealthStatus::Busy => "busy",
			HealthStatus::Overloaded => "overloaded",
		};
		f.write_str(s)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Bare(ChainId);

	#[async_trait]
	impl SettlementChainClient for Bare {
		fn chain_id(&self) -> &ChainId {
			&self.0
		}
	}

	#[tokio::test]
	async fn test_default_methods_return_not_implemented() {
		let client = Bare("x-chain".into());
		let err = client.issue_tx(&[1, 2, 3]).await.unwrap_err();
		assert_eq!(err, ChainError::NotImplemented("issue_tx"));
	}

	#[test]
	fn test_health_ordering() {
		assert!(HealthStatus::Overloaded > HealthStatus::Busy);
		assert_eq!(
			[HealthStatus::Busy, HealthStatus::Healthy]
				.into_iter()
				.max()
				.unwrap(),
			HealthStatus::Busy
		);
	}
}
