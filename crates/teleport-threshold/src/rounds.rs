//! Plumbing shared by the round steps of every protocol.

use crate::error::ThresholdError;
use crate::transport::{Collected, Envelope, Payload, RoundTransport};
use std::sync::Arc;
use std::time::Duration;
use teleport_storage::StorageService;
use teleport_types::{NodeId, SessionId};
use tokio::time::Instant;

/// Everything a round step needs besides the protocol state it consumes.
pub(crate) struct RoundContext {
	pub session_id: SessionId,
	pub transport: Arc<dyn RoundTransport>,
	pub storage: Arc<StorageService>,
	/// Parties this process acts for.
	pub local: Vec<NodeId>,
	pub round_timeout: Duration,
}

impl RoundContext {
	pub fn is_local(&self, node: &NodeId) -> bool {
		self.local.contains(node)
	}

	/// Members of `set` this process acts for, in `set` order.
	pub fn local_in(&self, set: &[NodeId]) -> Vec<NodeId> {
		set.iter().filter(|n| self.is_local(n)).copied().collect()
	}

	pub async fn broadcast(
		&self,
		round: u8,
		from: NodeId,
		payload: Payload,
	) -> Result<(), ThresholdError> {
		self.send(round, from, None, payload).await
	}

	pub async fn send(
		&self,
		round: u8,
		from: NodeId,
		to: Option<NodeId>,
		payload: Payload,
	) -> Result<(), ThresholdError> {
		self.transport
			.send(Envelope {
				session_id: self.session_id,
				round,
				from,
				to,
				payload,
			})
			.await?;
		Ok(())
	}

	/// Collects round messages for `recipient` from `expected` within one round timeout.
	pub async fn collect(
		&self,
		round: u8,
		recipient: NodeId,
		expected: &[NodeId],
	) -> Result<Collected, ThresholdError> {
		let deadline = Instant::now() + self.round_timeout;
		Ok(self
			.transport
			.collect(self.session_id, round, recipient, expected, deadline)
			.await?)
	}

	/// Like [`collect`](Self::collect) but fails the round if anyone stayed silent.
	pub async fn collect_all(
		&self,
		round: u8,
		recipient: NodeId,
		expected: &[NodeId],
	) -> Result<Collected, ThresholdError> {
		let collected = self.collect(round, recipient, expected).await?;
		if !collected.missing.is_empty() {
			return Err(ThresholdError::round(
				self.session_id,
				round,
				format!(
					"no message from {} of {} participants: {:?}",
					collected.missing.len(),
					expected.len(),
					collected.missing
				),
			));
		}
		Ok(collected)
	}

	pub fn fail(&self, round: u8, reason: impl Into<String>) -> ThresholdError {
		ThresholdError::round(self.session_id, round, reason)
	}
}

/// 1-based index of `node` within `set`.
pub(crate) fn index_in(set: &[NodeId], node: &NodeId) -> Option<u32> {
	set.iter().position(|n| n == node).map(|p| p as u32 + 1)
}
