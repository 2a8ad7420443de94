//! Public view of threshold protocol sessions.

use crate::{serde_helpers::hex_bytes, Id, NodeId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
	KeyGen,
	Sign,
	Reshare,
	Refresh,
}

impl fmt::Display for SessionType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			SessionType::KeyGen => "keygen",
			SessionType::Sign => "sign",
			SessionType::Reshare => "reshare",
			SessionType::Refresh => "refresh",
		};
		f.write_str(s)
	}
}

/// Session state. Transitions are monotonic and terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
	Pending,
	Active,
	Completed,
	Failed,
	Aborted,
}

impl SessionState {
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			SessionState::Completed | SessionState::Failed | SessionState::Aborted
		)
	}

	pub fn can_transition_to(&self, next: SessionState) -> bool {
		use SessionState::*;
		match (self, next) {
			(Pending, Active) => true,
			(Pending | Active, Failed | Aborted) => true,
			(Active, Completed) => true,
			_ => false,
		}
	}
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			SessionState::Pending => "pending",
			SessionState::Active => "active",
			SessionState::Completed => "completed",
			SessionState::Failed => "failed",
			SessionState::Aborted => "aborted",
		};
		f.write_str(s)
	}
}

/// Payload produced by a completed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionResult {
	/// Group public key created or preserved by keygen, reshare or refresh.
	GroupKey {
		#[serde(with = "hex_bytes")]
		public_key: Vec<u8>,
	},
	Signature {
		#[serde(with = "hex_bytes")]
		signature: Vec<u8>,
		signers: Vec<NodeId>,
	},
}

/// Externally visible record of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
	pub id: SessionId,
	pub session_type: SessionType,
	pub key_id: Id,
	pub participants: Vec<NodeId>,
	pub threshold: usize,
	pub state: SessionState,
	pub round: u8,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<SessionResult>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl SessionInfo {
	pub fn new(
		session_type: SessionType,
		key_id: Id,
		participants: Vec<NodeId>,
		threshold: usize,
	) -> Self {
		let now = Utc::now();
		Self {
			id: SessionId::new_v4(),
			session_type,
			key_id,
			participants,
			threshold,
			state: SessionState::Pending,
			round: 0,
			result: None,
			error: None,
			created_at: now,
			updated_at: now,
		}
	}

	/// Applies `next` if the state machine allows it. Returns whether it changed.
	pub fn advance(&mut self, next: SessionState) -> bool {
		if !self.state.can_transition_to(next) {
			return false;
		}
		self.state = next;
		self.updated_at = Utc::now();
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_session_cannot_leave_terminal_state() {
		let mut info = SessionInfo::new(SessionType::Sign, Id::default(), vec![], 1);
		assert!(info.advance(SessionState::Active));
		assert!(info.advance(SessionState::Failed));
		assert!(!info.advance(SessionState::Completed));
		assert!(!info.advance(SessionState::Active));
		assert_eq!(info.state, SessionState::Failed);
	}

	#[test]
	fn test_pending_cannot_complete_directly() {
		assert!(!SessionState::Pending.can_transition_to(SessionState::Completed));
	}
}
