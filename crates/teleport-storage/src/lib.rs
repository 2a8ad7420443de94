//! Namespaced persistence for the teleport subsystem.
//!
//! Components persist key shares, group keys, signatures, settlements,
//! transfers and registry records through [`StorageService`]. Each
//! [`Namespace`] is a separate keyspace, so identifiers from different
//! record kinds never collide. Values are stored as JSON.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod implementations {
	pub mod file;
	pub mod memory;
}

pub use implementations::file::FileStorage;
pub use implementations::memory::MemoryStorage;

#[derive(Debug, Error)]
pub enum StorageError {
	#[error("Not found: {0}")]
	NotFound(String),
	#[error("Serialization error: {0}")]
	Serialization(String),
	#[error("Backend error: {0}")]
	Backend(String),
}

/// Separate keyspaces used by the teleport components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
	KeyShares,
	PublicKeys,
	Signatures,
	Settlements,
	Transfers,
	Assets,
	ValidatorNfts,
	AppliedOps,
}

impl Namespace {
	pub fn as_str(&self) -> &'static str {
		match self {
			Namespace::KeyShares => "key_shares",
			Namespace::PublicKeys => "public_keys",
			Namespace::Signatures => "signatures",
			Namespace::Settlements => "settlements",
			Namespace::Transfers => "transfers",
			Namespace::Assets => "assets",
			Namespace::ValidatorNfts => "validator_nfts",
			Namespace::AppliedOps => "applied_ops",
		}
	}

	fn key(&self, id: &str) -> String {
		format!("{}:{}", self.as_str(), id)
	}
}

impl fmt::Display for Namespace {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Low-level byte store implemented by storage backends.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes with an optional time-to-live.
	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError>;

	/// Deletes a key. Deleting a missing key is not an error.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Lists every live key starting with `prefix`.
	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Typed storage over a [`StorageInterface`] backend.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// In-memory service, used by tests and dev nodes.
	pub fn in_memory() -> Self {
		Self::new(Box::new(MemoryStorage::new()))
	}

	pub async fn store<T: Serialize>(
		&self,
		namespace: Namespace,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		self.store_with_ttl(namespace, id, data, None).await
	}

	pub async fn store_with_ttl<T: Serialize>(
		&self,
		namespace: Namespace,
		id: &str,
		data: &T,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend.set_bytes(&namespace.key(id), bytes, ttl).await
	}

	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: Namespace,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&namespace.key(id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Like [`retrieve`](Self::retrieve) but maps a missing key to `None`.
	pub async fn try_retrieve<T: DeserializeOwned>(
		&self,
		namespace: Namespace,
		id: &str,
	) -> Result<Option<T>, StorageError> {
		match self.retrieve(namespace, id).await {
			Ok(value) => Ok(Some(value)),
			Err(StorageError::NotFound(_)) => Ok(None),
			Err(e) => Err(e),
		}
	}

	pub async fn exists(&self, namespace: Namespace, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&namespace.key(id)).await
	}

	pub async fn remove(&self, namespace: Namespace, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&namespace.key(id)).await
	}

	/// Returns the ids (without namespace prefix) stored in `namespace`.
	pub async fn list_ids(&self, namespace: Namespace) -> Result<Vec<String>, StorageError> {
		let prefix = namespace.key("");
		let keys = self.backend.list_keys(&prefix).await?;
		Ok(keys
			.into_iter()
			.filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
			.collect())
	}

	/// Loads every record of `namespace`, skipping entries that fail to decode.
	pub async fn load_all<T: DeserializeOwned>(
		&self,
		namespace: Namespace,
	) -> Result<Vec<T>, StorageError> {
		let mut out = Vec::new();
		for id in self.list_ids(namespace).await? {
			match self.retrieve(namespace, &id).await {
				Ok(value) => out.push(value),
				Err(StorageError::NotFound(_)) => {}
				Err(e) => tracing::warn!(namespace = %namespace, id = %id, "Skipping record: {}", e),
			}
		}
		Ok(out)
	}
}
