use crate::error::CoreError;
use std::fmt;
use tokio::sync::{broadcast, RwLock};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
	Created,
	Starting,
	Running,
	Stopping,
	Stopped,
	Failed,
}

impl fmt::Display for NodeState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::Created => "created",
			Self::Starting => "starting",
			Self::Running => "running",
			Self::Stopping => "stopping",
			Self::Stopped => "stopped",
			Self::Failed => "failed",
		};
		f.write_str(s)
	}
}

/// Tracks the node state and fans a shutdown signal out to its workers.
pub struct Lifecycle {
	state: RwLock<NodeState>,
	shutdown_tx: broadcast::Sender<()>,
}

impl Lifecycle {
	pub fn new() -> Self {
		let (shutdown_tx, _) = broadcast::channel(16);
		Self {
			state: RwLock::new(NodeState::Created),
			shutdown_tx,
		}
	}

	pub async fn state(&self) -> NodeState {
		*self.state.read().await
	}

	pub async fn set_state(&self, next: NodeState) -> Result<(), CoreError> {
		let mut state = self.state.write().await;
		let current = *state;
		if !valid_transition(current, next) {
			return Err(CoreError::Lifecycle(format!(
				"Invalid state transition from {} to {}",
				current, next
			)));
		}
		*state = next;
		info!("Node state changed: {} -> {}", current, next);
		Ok(())
	}

	/// Receivers created before [`signal_shutdown`](Self::signal_shutdown)
	/// observe the signal.
	pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
		self.shutdown_tx.subscribe()
	}

	pub fn signal_shutdown(&self) {
		let _ = self.shutdown_tx.send(());
	}

	pub async fn is_running(&self) -> bool {
		self.state().await == NodeState::Running
	}
}

impl Default for Lifecycle {
	fn default() -> Self {
		Self::new()
	}
}

fn valid_transition(from: NodeState, to: NodeState) -> bool {
	use NodeState::*;
	matches!(
		(from, to),
		(Created, Starting)
			| (Starting, Running)
			| (Running, Stopping)
			| (Stopping, Stopped)
			| (_, Failed)
	)
}
