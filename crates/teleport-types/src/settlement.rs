//! Settlement records, proof bundles and settlement-chain transactions.

use crate::{
	keccak256,
	serde_helpers::{hex_bytes, hex_bytes_opt, hex_bytes_vec},
	Address, ChainId, Id, SessionId, SettlementId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a settlement on the settlement chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementType {
	Mint,
	Burn,
}

impl fmt::Display for SettlementType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SettlementType::Mint => f.write_str("mint"),
			SettlementType::Burn => f.write_str("burn"),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
	Pending,
	InProgress,
	Completed,
	Failed,
}

impl SettlementStatus {
	pub fn is_terminal(&self) -> bool {
		matches!(self, SettlementStatus::Completed | SettlementStatus::Failed)
	}

	pub fn can_transition_to(&self, next: SettlementStatus) -> bool {
		use SettlementStatus::*;
		matches!(
			(self, next),
			(Pending, InProgress) | (Pending, Failed) | (InProgress, Completed) | (InProgress, Failed)
		)
	}
}

impl fmt::Display for SettlementStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			SettlementStatus::Pending => "pending",
			SettlementStatus::InProgress => "in_progress",
			SettlementStatus::Completed => "completed",
			SettlementStatus::Failed => "failed",
		};
		f.write_str(s)
	}
}

/// Circuit names used when verifying the parts of a [`TeleportProof`].
pub mod circuits {
	pub const TRANSFER: &str = "transfer";
	pub const SOURCE_STATE: &str = "source_state";
	pub const DEST_STATE: &str = "dest_state";
	pub const ASSET_VALIDITY: &str = "asset_validity";
	pub const EXECUTION: &str = "execution";
	pub const VALIDATOR_ELIGIBILITY: &str = "validator_eligibility";
}

/// Immutable bundle of proofs authorizing a settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeleportProof {
	#[serde(with = "hex_bytes")]
	pub transfer_proof: Vec<u8>,
	#[serde(with = "hex_bytes")]
	pub source_state_proof: Vec<u8>,
	#[serde(with = "hex_bytes")]
	pub dest_state_proof: Vec<u8>,
	#[serde(with = "hex_bytes")]
	pub asset_validity_proof: Vec<u8>,
	#[serde(default, with = "hex_bytes_opt", skip_serializing_if = "Option::is_none")]
	pub execution_proof: Option<Vec<u8>>,
	#[serde(with = "hex_bytes_vec", default)]
	pub validator_signatures: Vec<Vec<u8>>,
	pub proof_system: String,
	pub generated_at: DateTime<Utc>,
}

impl TeleportProof {
	/// Required sub-proofs paired with the circuit each one is checked against.
	pub fn required_parts(&self) -> [(&'static str, &[u8]); 4] {
		[
			(circuits::TRANSFER, self.transfer_proof.as_slice()),
			(circuits::SOURCE_STATE, self.source_state_proof.as_slice()),
			(circuits::DEST_STATE, self.dest_state_proof.as_slice()),
			(circuits::ASSET_VALIDITY, self.asset_validity_proof.as_slice()),
		]
	}

	/// First required sub-proof that is empty, if any.
	pub fn missing_part(&self) -> Option<&'static str> {
		self.required_parts()
			.into_iter()
			.find(|(_, bytes)| bytes.is_empty())
			.map(|(name, _)| name)
	}
}

/// Public inputs a settlement proof is bound to.
///
/// `chain` is the remote side of the settlement (source chain for mints,
/// destination chain for burns) and `party` the settlement-chain account
/// (recipient for mints, sender for burns).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofContext {
	pub kind: SettlementType,
	pub chain: ChainId,
	pub asset_id: Id,
	pub amount: u64,
	pub party: Address,
}

impl ProofContext {
	pub fn public_inputs(&self) -> Vec<u8> {
		let mut buf = Vec::with_capacity(128);
		buf.push(match self.kind {
			SettlementType::Mint => 0,
			SettlementType::Burn => 1,
		});
		buf.extend_from_slice(&(self.chain.as_str().len() as u32).to_be_bytes());
		buf.extend_from_slice(self.chain.as_str().as_bytes());
		buf.extend_from_slice(&self.asset_id.0);
		buf.extend_from_slice(&self.amount.to_be_bytes());
		buf.extend_from_slice(&(self.party.as_bytes().len() as u32).to_be_bytes());
		buf.extend_from_slice(self.party.as_bytes());
		buf
	}
}

/// One pending mint or burn on the settlement chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
	pub id: SettlementId,
	pub settlement_type: SettlementType,
	pub asset_id: Id,
	pub amount: u64,
	pub source_chain: ChainId,
	pub dest_chain: ChainId,
	/// Settlement-chain account credited by a mint or debited by a burn.
	pub party: Address,
	pub proof: TeleportProof,
	pub status: SettlementStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tx_id: Option<Id>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Settlement {
	pub fn set_status(&mut self, next: SettlementStatus) -> bool {
		if !self.status.can_transition_to(next) {
			return false;
		}
		self.status = next;
		self.updated_at = Utc::now();
		true
	}
}

/// Unspent output on the settlement chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
	pub id: Id,
	pub asset_id: Id,
	pub owner: Address,
	pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
	pub asset_id: Id,
	pub owner: Address,
	pub amount: u64,
}

/// Amount of an asset destroyed by a burn transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnEntry {
	pub asset_id: Id,
	pub owner: Address,
	pub amount: u64,
}

/// Batched settlement-chain transaction covering one asset-direction group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementTx {
	pub kind: SettlementType,
	pub settlement_ids: Vec<SettlementId>,
	/// UTXOs consumed by a burn; empty for mints.
	#[serde(default)]
	pub inputs: Vec<Id>,
	/// Minted outputs, or change outputs of a burn.
	#[serde(default)]
	pub outputs: Vec<TxOutput>,
	#[serde(default)]
	pub burns: Vec<BurnEntry>,
	pub created_at: DateTime<Utc>,
}

impl SettlementTx {
	/// Hash the threshold signature is produced over.
	pub fn signing_hash(&self) -> [u8; 32] {
		// Field order of the derive is stable, so the JSON encoding is canonical.
		keccak256(&serde_json::to_vec(self).unwrap_or_default())
	}
}

/// A settlement transaction with its group signature attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedSettlementTx {
	pub tx: SettlementTx,
	#[serde(with = "hex_bytes")]
	pub signature: Vec<u8>,
	pub signing_session: SessionId,
}

impl SignedSettlementTx {
	pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
		serde_json::to_vec(self)
	}

	pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
		serde_json::from_slice(bytes)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn proof() -> TeleportProof {
		TeleportProof {
			transfer_proof: vec![1],
			source_state_proof: vec![2],
			dest_state_proof: vec![3],
			asset_validity_proof: vec![4],
			execution_proof: None,
			validator_signatures: vec![],
			proof_system: "digest".into(),
			generated_at: Utc::now(),
		}
	}

	#[test]
	fn test_missing_part_reports_first_empty_field() {
		let mut p = proof();
		assert_eq!(p.missing_part(), None);
		p.dest_state_proof.clear();
		assert_eq!(p.missing_part(), Some(circuits::DEST_STATE));
		p.transfer_proof.clear();
		assert_eq!(p.missing_part(), Some(circuits::TRANSFER));
	}

	#[test]
	fn test_settlement_status_is_monotonic() {
		use SettlementStatus::*;
		assert!(Pending.can_transition_to(InProgress));
		assert!(!Completed.can_transition_to(Failed));
		assert!(!Failed.can_transition_to(Completed));
		assert!(!InProgress.can_transition_to(Pending));
	}

	#[test]
	fn test_public_inputs_bind_party_and_kind() {
		let ctx = ProofContext {
			kind: SettlementType::Mint,
			chain: "c-chain".into(),
			asset_id: Id([1; 32]),
			amount: 10,
			party: Address(vec![1, 2]),
		};
		let mut other = ctx.clone();
		other.kind = SettlementType::Burn;
		assert_ne!(ctx.public_inputs(), other.public_inputs());
		other = ctx.clone();
		other.party = Address(vec![1, 3]);
		assert_ne!(ctx.public_inputs(), other.public_inputs());
	}
}
