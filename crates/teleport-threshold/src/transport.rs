//! Delivery of protocol round messages between participants.
//!
//! Rounds never share mutable state. A round step produces envelopes, hands
//! them to a [`RoundTransport`], and the next step collects what arrived for
//! it before the round deadline.

use async_trait::async_trait;
use curve25519_dalek::{ristretto::RistrettoPoint, scalar::Scalar};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use teleport_types::{NodeId, SessionId};
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
	#[error("Not implemented: {0}")]
	NotImplemented(&'static str),
	#[error("Transport closed")]
	Closed,
}

/// Round message contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
	/// Key generation round 1. Dealers include a hash of their coefficient
	/// commitments; every member includes an ephemeral key for share encryption.
	KeyGenCommit {
		commitment: Option<[u8; 32]>,
		ephemeral_key: RistrettoPoint,
	},
	/// Key generation round 2: an encrypted share plus the revealed commitments.
	KeyGenShare {
		encrypted_share: Scalar,
		commitments: Vec<RistrettoPoint>,
	},
	/// Signing round 1: hiding and binding nonce commitments.
	SignNonce {
		hiding: RistrettoPoint,
		binding: RistrettoPoint,
	},
	/// Signing round 2: partial signature.
	SignPartial { z: Scalar },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
	pub session_id: SessionId,
	pub round: u8,
	pub from: NodeId,
	/// `None` broadcasts to every participant.
	pub to: Option<NodeId>,
	pub payload: Payload,
}

/// Messages collected for one recipient and round.
#[derive(Debug, Default)]
pub struct Collected {
	pub messages: HashMap<NodeId, Payload>,
	/// Expected senders with no message by the deadline.
	pub missing: Vec<NodeId>,
}

#[async_trait]
pub trait RoundTransport: Send + Sync {
	async fn send(&self, _envelope: Envelope) -> Result<(), TransportError> {
		Err(TransportError::NotImplemented("send"))
	}

	/// Waits until every sender in `expected` delivered a round message for
	/// `recipient`, or until `deadline`, and returns what arrived.
	async fn collect(
		&self,
		_session_id: SessionId,
		_round: u8,
		_recipient: NodeId,
		_expected: &[NodeId],
		_deadline: Instant,
	) -> Result<Collected, TransportError> {
		Err(TransportError::NotImplemented("collect"))
	}

	/// Drops every buffered message of a session.
	async fn discard(&self, _session_id: SessionId) {}
}

/// Transport for participants hosted in one process.
#[derive(Default)]
pub struct InMemoryTransport {
	mailboxes: Mutex<HashMap<(SessionId, u8), Vec<Envelope>>>,
	notify: Notify,
}

impl InMemoryTransport {
	pub fn new() -> Self {
		Self::default()
	}

	async fn snapshot(
		&self,
		session_id: SessionId,
		round: u8,
		recipient: NodeId,
		expected: &[NodeId],
	) -> Collected {
		let mailboxes = self.mailboxes.lock().await;
		let mut messages = HashMap::new();
		if let Some(envelopes) = mailboxes.get(&(session_id, round)) {
			for envelope in envelopes {
				let addressed = envelope.to.map_or(true, |to| to == recipient);
				if addressed && expected.contains(&envelope.from) {
					// First message per sender wins.
					messages
						.entry(envelope.from)
						.or_insert_with(|| envelope.payload.clone());
				}
			}
		}
		let missing = expected
			.iter()
			.filter(|node| !messages.contains_key(*node))
			.copied()
			.collect();
		Collected { messages, missing }
	}
}

#[async_trait]
impl RoundTransport for InMemoryTransport {
	async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
		self.mailboxes
			.lock()
			.await
			.entry((envelope.session_id, envelope.round))
			.or_default()
			.push(envelope);
		self.notify.notify_waiters();
		Ok(())
	}

	async fn collect(
		&self,
		session_id: SessionId,
		round: u8,
		recipient: NodeId,
		expected: &[NodeId],
		deadline: Instant,
	) -> Result<Collected, TransportError> {
		loop {
			let notified = self.notify.notified();
			tokio::pin!(notified);
			notified.as_mut().enable();

			let collected = self.snapshot(session_id, round, recipient, expected).await;
			if collected.missing.is_empty() {
				return Ok(collected);
			}
			if tokio::time::timeout_at(deadline, notified).await.is_err() {
				return Ok(self.snapshot(session_id, round, recipient, expected).await);
			}
		}
	}

	async fn discard(&self, session_id: SessionId) {
		self.mailboxes
			.lock()
			.await
			.retain(|(session, _), _| *session != session_id);
	}
}
