//! In-memory storage backend with optional per-key expiry.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

struct Entry {
	value: Vec<u8>,
	expires_at: Option<Instant>,
}

impl Entry {
	fn is_live(&self, now: Instant) -> bool {
		self.expires_at.map_or(true, |at| at > now)
	}
}

/// Process-local storage. Expired keys are dropped lazily on access.
#[derive(Default)]
pub struct MemoryStorage {
	data: DashMap<String, Entry>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let now = Instant::now();
		if let Some(entry) = self.data.get(key) {
			if entry.is_live(now) {
				return Ok(entry.value.clone());
			}
		}
		self.data.remove_if(key, |_, e| !e.is_live(now));
		Err(StorageError::NotFound(key.to_string()))
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let expires_at = ttl.map(|ttl| Instant::now() + ttl);
		self.data
			.insert(key.to_string(), Entry { value, expires_at });
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		self.data.remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let now = Instant::now();
		Ok(self.data.get(key).is_some_and(|e| e.is_live(now)))
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let now = Instant::now();
		Ok(self
			.data
			.iter()
			.filter(|entry| entry.key().starts_with(prefix) && entry.value().is_live(now))
			.map(|entry| entry.key().clone())
			.collect())
	}
}
