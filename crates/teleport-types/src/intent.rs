//! User-authored teleport intents.

use crate::{keccak256, serde_helpers::hex_bytes, Address, AssetIdentifier, ChainId, Id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What the submitter asks the subsystem to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
	Transfer,
	Swap,
	Stake,
	Bridge,
}

impl IntentType {
	fn tag(&self) -> u8 {
		match self {
			IntentType::Transfer => 0,
			IntentType::Swap => 1,
			IntentType::Stake => 2,
			IntentType::Bridge => 3,
		}
	}
}

/// A signed request to move an asset across chains.
///
/// Intents are immutable once signed. The signature covers the canonical
/// encoding produced by [`TeleportIntent::signing_hash`]; metadata is part of
/// the signed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeleportIntent {
	pub id: Id,
	pub intent_type: IntentType,
	pub source_asset: AssetIdentifier,
	pub dest_asset: AssetIdentifier,
	pub amount: u64,
	pub sender: Address,
	pub recipient: Address,
	pub deadline: DateTime<Utc>,
	#[serde(with = "hex_bytes")]
	pub signature: Vec<u8>,
	#[serde(default)]
	pub metadata: BTreeMap<String, String>,
}

impl TeleportIntent {
	pub fn source_chain(&self) -> &ChainId {
		&self.source_asset.chain
	}

	pub fn dest_chain(&self) -> &ChainId {
		&self.dest_asset.chain
	}

	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		self.deadline <= now
	}

	/// Keccak-256 of the canonical encoding of every field except the signature.
	pub fn signing_hash(&self) -> [u8; 32] {
		let mut buf = Vec::with_capacity(256);
		buf.extend_from_slice(&self.id.0);
		buf.push(self.intent_type.tag());
		encode_asset(&mut buf, &self.source_asset);
		encode_asset(&mut buf, &self.dest_asset);
		buf.extend_from_slice(&self.amount.to_be_bytes());
		encode_bytes(&mut buf, self.sender.as_bytes());
		encode_bytes(&mut buf, self.recipient.as_bytes());
		buf.extend_from_slice(&self.deadline.timestamp_millis().to_be_bytes());
		buf.extend_from_slice(&(self.metadata.len() as u32).to_be_bytes());
		for (key, value) in &self.metadata {
			encode_bytes(&mut buf, key.as_bytes());
			encode_bytes(&mut buf, value.as_bytes());
		}
		keccak256(&buf)
	}
}

fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
	buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
	buf.extend_from_slice(bytes);
}

fn encode_asset(buf: &mut Vec<u8>, asset: &AssetIdentifier) {
	encode_bytes(buf, asset.chain.as_str().as_bytes());
	buf.extend_from_slice(&asset.asset_id.0);
	match &asset.token_id {
		Some(token) => {
			buf.push(1);
			buf.extend_from_slice(&token.0);
		}
		None => buf.push(0),
	}
}
