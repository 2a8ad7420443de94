//! Key shares, group keys and their persistence.
//!
//! Both are append-only. Every successful keygen, reshare or refresh writes a
//! new epoch; the group key record points at the current epoch and shares are
//! stored per `(key, epoch, node)`.

use crate::error::ThresholdError;
use chrono::{DateTime, Utc};
use curve25519_dalek::{ristretto::RistrettoPoint, scalar::Scalar};
use serde::{Deserialize, Serialize};
use std::fmt;
use teleport_storage::{Namespace, StorageService};
use teleport_types::{Id, NodeId, SessionId};

/// One participant's share of a distributed key. Never leaves this process.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyShare {
	pub key_id: Id,
	pub epoch: u32,
	pub node_id: NodeId,
	/// 1-based evaluation point of this share.
	pub index: u32,
	pub secret: Scalar,
	pub threshold: usize,
	pub total: usize,
}

impl fmt::Debug for KeyShare {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("KeyShare")
			.field("key_id", &self.key_id)
			.field("epoch", &self.epoch)
			.field("node_id", &self.node_id)
			.field("index", &self.index)
			.field("threshold", &self.threshold)
			.finish_non_exhaustive()
	}
}

/// Public verification data for a distributed key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPublicKey {
	pub key_id: Id,
	pub epoch: u32,
	pub public_key: RistrettoPoint,
	/// Ordered participant set; position `i` holds share index `i + 1`.
	pub participants: Vec<NodeId>,
	/// `x_i * G` for every participant, in participant order.
	pub verification_shares: Vec<RistrettoPoint>,
	pub threshold: usize,
	/// Session whose result was confirmed by an accepted block.
	#[serde(default)]
	pub confirmed_by: Option<SessionId>,
	pub created_at: DateTime<Utc>,
}

impl GroupPublicKey {
	pub fn index_of(&self, node: &NodeId) -> Option<u32> {
		self.participants
			.iter()
			.position(|p| p == node)
			.map(|pos| pos as u32 + 1)
	}

	pub fn verification_share(&self, index: u32) -> Option<&RistrettoPoint> {
		index
			.checked_sub(1)
			.and_then(|i| self.verification_shares.get(i as usize))
	}

	pub fn public_key_bytes(&self) -> Vec<u8> {
		self.public_key.compress().as_bytes().to_vec()
	}

	/// True when this node only knows the public key and cannot take part in signing.
	pub fn is_watch_only(&self) -> bool {
		self.participants.is_empty()
	}
}

/// Signature produced by a sign session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRecord {
	pub session_id: SessionId,
	#[serde(default)]
	pub key_id: Option<Id>,
	pub signature: String,
	pub signers: Vec<NodeId>,
	pub stored_at: DateTime<Utc>,
}

/// Typed access to the key namespaces.
pub(crate) struct KeyStore<'a> {
	storage: &'a StorageService,
}

impl<'a> KeyStore<'a> {
	pub fn new(storage: &'a StorageService) -> Self {
		Self { storage }
	}

	fn share_key(key_id: &Id, epoch: u32, node: &NodeId) -> String {
		format!("{}:{}:{}", key_id, epoch, node)
	}

	pub async fn group_key(&self, key_id: &Id) -> Result<Option<GroupPublicKey>, ThresholdError> {
		Ok(self
			.storage
			.try_retrieve(Namespace::PublicKeys, &key_id.to_string())
			.await?)
	}

	pub async fn save_group_key(&self, key: &GroupPublicKey) -> Result<(), ThresholdError> {
		self.storage
			.store(Namespace::PublicKeys, &key.key_id.to_string(), key)
			.await?;
		Ok(())
	}

	pub async fn share(
		&self,
		key_id: &Id,
		epoch: u32,
		node: &NodeId,
	) -> Result<Option<KeyShare>, ThresholdError> {
		Ok(self
			.storage
			.try_retrieve(Namespace::KeyShares, &Self::share_key(key_id, epoch, node))
			.await?)
	}

	pub async fn save_share(&self, share: &KeyShare) -> Result<(), ThresholdError> {
		let key = Self::share_key(&share.key_id, share.epoch, &share.node_id);
		self.storage.store(Namespace::KeyShares, &key, share).await?;
		Ok(())
	}

	pub async fn shares_for(&self, key_id: &Id) -> Result<Vec<KeyShare>, ThresholdError> {
		let prefix = format!("{}:", key_id);
		let mut shares = Vec::new();
		for id in self.storage.list_ids(Namespace::KeyShares).await? {
			if id.starts_with(&prefix) {
				if let Some(share) = self.storage.try_retrieve(Namespace::KeyShares, &id).await? {
					shares.push(share);
				}
			}
		}
		Ok(shares)
	}

	pub async fn signature(
		&self,
		session_id: &SessionId,
	) -> Result<Option<SignatureRecord>, ThresholdError> {
		Ok(self
			.storage
			.try_retrieve(Namespace::Signatures, &session_id.to_string())
			.await?)
	}

	pub async fn save_signature(&self, record: &SignatureRecord) -> Result<(), ThresholdError> {
		self.storage
			.store(Namespace::Signatures, &record.session_id.to_string(), record)
			.await?;
		Ok(())
	}
}
