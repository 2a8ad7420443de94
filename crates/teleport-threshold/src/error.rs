use crate::transport::TransportError;
use teleport_storage::StorageError;
use teleport_types::{Id, NodeId, SessionId, SessionState};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ThresholdError {
	#[error("Invalid session request: {0}")]
	InvalidRequest(String),

	#[error("Too many active sessions ({active}/{max})")]
	TooManySessions { active: usize, max: usize },

	#[error("Session {0} not found")]
	SessionNotFound(SessionId),

	#[error("Key {0} not found")]
	KeyNotFound(Id),

	#[error("Key {0} already exists")]
	KeyExists(Id),

	#[error("Node {node:?} holds no share of key {key_id}")]
	NoLocalShare { key_id: Id, node: NodeId },

	#[error("Session {session_id} failed in round {round}: {reason}")]
	Round {
		session_id: SessionId,
		round: u8,
		reason: String,
	},

	#[error("Insufficient signers: have {have}, need {need}")]
	InsufficientSigners { have: usize, need: usize },

	#[error("Invalid signature: {0}")]
	InvalidSignature(String),

	#[error("Public key mismatch for key {0}")]
	KeyMismatch(Id),

	#[error("Session {0} timed out")]
	Timeout(SessionId),

	#[error("Session {session_id} ended {state}: {reason}")]
	SessionEnded {
		session_id: SessionId,
		state: SessionState,
		reason: String,
	},

	#[error("Storage error: {0}")]
	Storage(String),

	#[error("Transport error: {0}")]
	Transport(#[from] TransportError),
}

impl ThresholdError {
	pub(crate) fn round(session_id: SessionId, round: u8, reason: impl Into<String>) -> Self {
		Self::Round {
			session_id,
			round,
			reason: reason.into(),
		}
	}
}

impl From<StorageError> for ThresholdError {
	fn from(err: StorageError) -> Self {
		Self::Storage(err.to_string())
	}
}
