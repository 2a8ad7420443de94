use teleport_orchestrator::OrchestratorError;
use teleport_settlement::SettlementError;
use teleport_storage::StorageError;
use teleport_threshold::ThresholdError;
use teleport_types::ChainError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
	#[error("Configuration error: {0}")]
	Configuration(String),

	#[error("Lifecycle error: {0}")]
	Lifecycle(String),

	#[error("Orchestrator error: {0}")]
	Orchestrator(#[from] OrchestratorError),

	#[error("Settlement error: {0}")]
	Settlement(#[from] SettlementError),

	#[error("Threshold error: {0}")]
	Threshold(#[from] ThresholdError),

	#[error("Validator set error: {0}")]
	ValidatorSet(#[from] ChainError),

	#[error("Storage error: {0}")]
	Storage(String),

	#[error("Task error: {0}")]
	Task(String),
}

impl CoreError {
	/// Storage failures abort block processing; everything else is a
	/// rejection of the individual operation.
	pub fn is_fatal(&self) -> bool {
		match self {
			CoreError::Storage(_) | CoreError::Lifecycle(_) | CoreError::Task(_) => true,
			CoreError::Orchestrator(OrchestratorError::Storage(_)) => true,
			CoreError::Settlement(SettlementError::Storage(_)) => true,
			CoreError::Threshold(ThresholdError::Storage(_)) => true,
			_ => false,
		}
	}
}

impl From<StorageError> for CoreError {
	fn from(err: StorageError) -> Self {
		Self::Storage(err.to_string())
	}
}
