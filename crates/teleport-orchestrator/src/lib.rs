//! Transfer orchestration for the teleport subsystem.
//!
//! [`TransferOrchestrator`] turns signed intents into transfers. Each intent
//! is validated, classified into a mint, burn, transit or stake path, and
//! driven through settlement legs on the settlement chain and, where the
//! destination needs it, a threshold-signed release authorization.

pub mod auth;
pub mod bundle;
pub mod error;
pub mod orchestrator;
pub mod pool;
pub mod registry;
pub mod route;
pub mod validators;

pub use auth::{sender_address, sign_intent, Ed25519IntentAuthenticator};
pub use error::{OrchestratorError, ValidationError};
pub use orchestrator::{HeldTransit, OrchestratorDeps, OrchestratorStats, TransferOrchestrator};
pub use pool::IntentPool;
pub use registry::AssetRegistry;
pub use route::{stake_keys, Dispatch, StakeParams};
pub use validators::ValidatorNftRegistry;
