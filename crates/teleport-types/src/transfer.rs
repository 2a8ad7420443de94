//! Transfer lifecycle records owned by the orchestrator.

use crate::{ChainId, SessionId, SettlementId, TeleportAsset, TeleportIntent, TransferId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle status of a transfer.
///
/// `pending -> executing -> settling -> {completed | failed | refunded}`.
/// A transfer may fail from any non-terminal status; refunds only apply to
/// transfers that reached settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
	Pending,
	Executing,
	Settling,
	Completed,
	Failed,
	Refunded,
}

impl TransferStatus {
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Refunded
		)
	}

	pub fn can_transition_to(&self, next: TransferStatus) -> bool {
		use TransferStatus::*;
		matches!(
			(self, next),
			(Pending, Executing)
				| (Executing, Settling)
				| (Settling, Completed)
				| (Settling, Refunded)
				| (Pending, Failed)
				| (Executing, Failed)
				| (Settling, Failed)
		)
	}
}

impl fmt::Display for TransferStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			TransferStatus::Pending => "pending",
			TransferStatus::Executing => "executing",
			TransferStatus::Settling => "settling",
			TransferStatus::Completed => "completed",
			TransferStatus::Failed => "failed",
			TransferStatus::Refunded => "refunded",
		};
		f.write_str(s)
	}
}

/// Chain-pair and asset-type classification of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferRoute {
	/// Destination is the settlement chain.
	Mint,
	/// Source is the settlement chain.
	Burn,
	/// Neither endpoint is the settlement chain.
	Transit,
	/// Validator NFT moving to the staking chain.
	Stake,
}

impl fmt::Display for TransferRoute {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			TransferRoute::Mint => "mint",
			TransferRoute::Burn => "burn",
			TransferRoute::Transit => "transit",
			TransferRoute::Stake => "stake",
		};
		f.write_str(s)
	}
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid transfer transition {from} -> {to}")]
pub struct InvalidTransition {
	pub from: TransferStatus,
	pub to: TransferStatus,
}

/// Server-side lifecycle record wrapping one intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeleportTransfer {
	pub id: TransferId,
	pub intent: TeleportIntent,
	pub status: TransferStatus,
	pub route: TransferRoute,
	pub source_chain: ChainId,
	pub dest_chain: ChainId,
	pub asset: TeleportAsset,
	/// Settlements issued on behalf of this transfer, in leg order.
	#[serde(default)]
	pub settlement_ids: Vec<SettlementId>,
	/// Threshold sessions that produced authorizations for this transfer.
	#[serde(default)]
	pub session_ids: Vec<SessionId>,
	/// Destination release authorization, once obtained.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub authorization: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub completed_at: Option<DateTime<Utc>>,
}

impl TeleportTransfer {
	pub fn new(intent: TeleportIntent, route: TransferRoute, asset: TeleportAsset) -> Self {
		let now = Utc::now();
		Self {
			id: TransferId::new_v4(),
			source_chain: intent.source_chain().clone(),
			dest_chain: intent.dest_chain().clone(),
			intent,
			status: TransferStatus::Pending,
			route,
			asset,
			settlement_ids: Vec::new(),
			session_ids: Vec::new(),
			authorization: None,
			error: None,
			created_at: now,
			updated_at: now,
			completed_at: None,
		}
	}

	/// Moves the transfer to `next`, enforcing the status state machine.
	pub fn transition(&mut self, next: TransferStatus) -> Result<(), InvalidTransition> {
		if !self.status.can_transition_to(next) {
			return Err(InvalidTransition {
				from: self.status,
				to: next,
			});
		}
		let now = Utc::now();
		self.status = next;
		self.updated_at = now;
		if next.is_terminal() {
			self.completed_at = Some(now);
		}
		Ok(())
	}

	/// Marks the transfer failed with `error`.
	pub fn fail(&mut self, error: impl Into<String>) -> Result<(), InvalidTransition> {
		self.transition(TransferStatus::Failed)?;
		self.error = Some(error.into());
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_status_machine_never_skips() {
		use TransferStatus::*;
		assert!(Pending.can_transition_to(Executing));
		assert!(!Pending.can_transition_to(Settling));
		assert!(!Pending.can_transition_to(Completed));
		assert!(!Executing.can_transition_to(Completed));
		assert!(!Executing.can_transition_to(Refunded));
		assert!(Settling.can_transition_to(Refunded));
	}

	#[test]
	fn test_terminal_states_are_final() {
		use TransferStatus::*;
		for terminal in [Completed, Failed, Refunded] {
			for next in [Pending, Executing, Settling, Completed, Failed, Refunded] {
				assert!(!terminal.can_transition_to(next));
			}
		}
	}
}
