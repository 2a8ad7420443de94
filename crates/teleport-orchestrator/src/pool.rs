//! Bounded pool of intents introduced by blocks.
//!
//! Intents are staged when their block is built or verified and become ready
//! for dispatch once the block is accepted. Rejecting a block drops the
//! intents it introduced.

use crate::error::OrchestratorError;
use std::collections::VecDeque;
use teleport_types::{Id, TeleportIntent};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
struct PooledIntent {
	intent: TeleportIntent,
	block_id: Id,
	ready: bool,
}

pub struct IntentPool {
	max_size: usize,
	entries: Mutex<VecDeque<PooledIntent>>,
}

impl IntentPool {
	pub fn new(max_size: usize) -> Self {
		Self {
			max_size,
			entries: Mutex::new(VecDeque::new()),
		}
	}

	/// Stages `intent` under `block_id`. Staging an intent twice is a no-op.
	pub async fn stage(&self, block_id: Id, intent: TeleportIntent) -> Result<(), OrchestratorError> {
		let mut entries = self.entries.lock().await;
		if entries.iter().any(|e| e.intent.id == intent.id) {
			return Ok(());
		}
		if entries.len() >= self.max_size {
			return Err(OrchestratorError::PoolFull { max: self.max_size });
		}
		debug!(intent_id = %intent.id, block_id = %block_id, "Staged intent");
		entries.push_back(PooledIntent {
			intent,
			block_id,
			ready: false,
		});
		Ok(())
	}

	/// Makes the intents of an accepted block ready. Returns how many.
	pub async fn accept_block(&self, block_id: &Id) -> usize {
		let mut entries = self.entries.lock().await;
		let mut count = 0;
		for entry in entries.iter_mut().filter(|e| &e.block_id == block_id) {
			entry.ready = true;
			count += 1;
		}
		count
	}

	/// Drops the intents of a rejected block. Returns how many.
	pub async fn reject_block(&self, block_id: &Id) -> usize {
		let mut entries = self.entries.lock().await;
		let before = entries.len();
		entries.retain(|e| &e.block_id != block_id);
		before - entries.len()
	}

	/// Removes and returns every ready intent, oldest first.
	pub async fn take_ready(&self) -> Vec<TeleportIntent> {
		let mut entries = self.entries.lock().await;
		let (ready, staged): (VecDeque<_>, VecDeque<_>) =
			std::mem::take(&mut *entries).into_iter().partition(|e| e.ready);
		*entries = staged;
		ready.into_iter().map(|e| e.intent).collect()
	}

	pub async fn contains(&self, intent_id: &Id) -> bool {
		self.entries.lock().await.iter().any(|e| &e.intent.id == intent_id)
	}

	pub async fn len(&self) -> usize {
		self.entries.lock().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.entries.lock().await.is_empty()
	}
}
