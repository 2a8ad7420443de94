//! Events broadcast between teleport components.

use crate::{
	Id, SessionId, SessionType, SettlementId, SettlementType, TransferId, TransferStatus,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TeleportEvent {
	Settlement(SettlementEvent),
	Session(SessionEvent),
	Transfer(TransferEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SettlementEvent {
	Queued {
		settlement_id: SettlementId,
		settlement_type: SettlementType,
	},
	Submitted {
		settlement_ids: Vec<SettlementId>,
		tx_id: Id,
	},
	Completed {
		settlement_id: SettlementId,
		tx_id: Id,
	},
	Failed {
		settlement_id: SettlementId,
		error: String,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
	Started {
		session_id: SessionId,
		session_type: SessionType,
	},
	Completed {
		session_id: SessionId,
	},
	Failed {
		session_id: SessionId,
		error: String,
	},
	Expired {
		session_id: SessionId,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransferEvent {
	StatusChanged {
		transfer_id: TransferId,
		status: TransferStatus,
	},
}

/// Broadcast bus shared by every component of a node.
///
/// Cloning yields another handle to the same channel.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<TeleportEvent>,
}

impl EventBus {
	/// Creates a bus buffering up to `capacity` events per subscriber.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<TeleportEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event to all current subscribers.
	///
	/// Fails only when nobody is subscribed, which callers treat as benign.
	pub fn publish(
		&self,
		event: TeleportEvent,
	) -> Result<(), broadcast::error::SendError<TeleportEvent>> {
		self.sender.send(event)?;
		Ok(())
	}
}
