use crate::error::ThresholdError;
use crate::manager::ThresholdSessionManager;
use async_trait::async_trait;
use teleport_types::{Id, SignatureOutcome, SignerError, TransactionSigner};

/// [`TransactionSigner`] backed by threshold sign sessions on one key.
#[derive(Clone)]
pub struct ThresholdSigner {
	manager: ThresholdSessionManager,
	key_id: Id,
}

impl ThresholdSigner {
	pub fn new(manager: ThresholdSessionManager, key_id: Id) -> Self {
		Self { manager, key_id }
	}

	pub fn key_id(&self) -> Id {
		self.key_id
	}
}

#[async_trait]
impl TransactionSigner for ThresholdSigner {
	async fn sign(&self, payload: &[u8]) -> Result<SignatureOutcome, SignerError> {
		self.manager
			.sign(self.key_id, payload)
			.await
			.map_err(|e| match e {
				ThresholdError::Timeout(_) => SignerError::Timeout,
				other => SignerError::Failed(other.to_string()),
			})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::manager::SessionRequest;
	use crate::transport::InMemoryTransport;
	use std::sync::Arc;
	use std::time::Duration;
	use teleport_config::ThresholdConfig;
	use teleport_storage::StorageService;
	use teleport_types::{EventBus, NodeId, SessionState};

	fn manager() -> ThresholdSessionManager {
		ThresholdSessionManager::new(
			ThresholdConfig {
				participants: (1..=3).map(|i| NodeId([i; 20])).collect(),
				local_parties: Vec::new(),
				threshold: 2,
				signing_key_id: Id([4; 32]),
				round_timeout_ms: 300,
				session_timeout_secs: 2,
				sign_timeout_ms: 5_000,
				max_concurrent_sessions: 4,
				sweep_interval_ms: 50,
			},
			Arc::new(StorageService::in_memory()),
			Arc::new(InMemoryTransport::new()),
			EventBus::new(64),
		)
	}

	#[tokio::test]
	async fn test_signer_runs_on_spawned_task() {
		let manager = manager();
		let cfg = manager.config().clone();
		let keygen = manager
			.start_session(SessionRequest::KeyGen {
				key_id: cfg.signing_key_id,
				participants: cfg.participants.clone(),
				threshold: cfg.threshold,
			})
			.await
			.unwrap();
		for _ in 0..200 {
			let (_, state) = manager.get_result(keygen).await.unwrap();
			if state.is_terminal() {
				assert_eq!(state, SessionState::Completed);
				break;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}

		let signer: Arc<dyn TransactionSigner> =
			Arc::new(ThresholdSigner::new(manager.clone(), cfg.signing_key_id));
		let outcome = tokio::spawn(async move { signer.sign(b"settlement tx").await })
			.await
			.unwrap()
			.unwrap();
		assert_eq!(outcome.signature.len(), 64);
		assert!(manager
			.signature(&outcome.session_id)
			.await
			.unwrap()
			.is_some());
	}
}
