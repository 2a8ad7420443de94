//! File-backed storage.
//!
//! Each key maps to one file. The namespace part of a key (everything before
//! the first `:`) becomes a subdirectory so keyspaces stay separate on disk.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

const EXTENSION: &str = "json";

/// Stores values as files below `base_path`. TTLs are not enforced.
pub struct FileStorage {
	base_path: PathBuf,
}

impl FileStorage {
	pub fn new(base_path: impl Into<PathBuf>) -> Self {
		Self {
			base_path: base_path.into(),
		}
	}

	pub fn base_path(&self) -> &Path {
		&self.base_path
	}

	fn get_file_path(&self, key: &str) -> PathBuf {
		let (dir, name) = key.split_once(':').unwrap_or(("default", key));
		self.base_path
			.join(escape(dir))
			.join(format!("{}.{}", escape(name), EXTENSION))
	}
}

fn escape(segment: &str) -> String {
	segment
		.replace('%', "%25")
		.replace(':', "%3A")
		.replace('/', "%2F")
		.replace('\\', "%5C")
}

fn unescape(segment: &str) -> String {
	segment
		.replace("%5C", "\\")
		.replace("%2F", "/")
		.replace("%3A", ":")
		.replace("%25", "%")
}

fn backend(e: std::io::Error) -> StorageError {
	StorageError::Backend(e.to_string())
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let path = self.get_file_path(key);
		match fs::read(&path).await {
			Ok(data) => Ok(data),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				Err(StorageError::NotFound(key.to_string()))
			}
			Err(e) => Err(backend(e)),
		}
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		_ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let path = self.get_file_path(key);
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent).await.map_err(backend)?;
		}

		// Write to a temp file and rename so readers never see partial data.
		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, value).await.map_err(backend)?;
		fs::rename(&temp_path, &path).await.map_err(backend)?;
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		match fs::remove_file(self.get_file_path(key)).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(backend(e)),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		fs::try_exists(self.get_file_path(key))
			.await
			.map_err(backend)
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let (namespace, id_prefix) = prefix.split_once(':').unwrap_or((prefix, ""));
		let dir = self.base_path.join(escape(namespace));

		let mut entries = match fs::read_dir(&dir).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(backend(e)),
		};

		let mut keys = Vec::new();
		while let Some(entry) = entries.next_entry().await.map_err(backend)? {
			let path = entry.path();
			if path.extension().and_then(|s| s.to_str()) != Some(EXTENSION) {
				continue;
			}
			let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
				continue;
			};
			let id = unescape(stem);
			if id.starts_with(id_prefix) {
				keys.push(format!("{}:{}", namespace, id));
			}
		}
		Ok(keys)
	}
}
