//! Local implementations of the capabilities the teleport core consumes.
//!
//! - `implementations::settlement`: in-memory UTXO settlement chain
//! - `implementations::execution`: account-model execution chain used for proof context
//! - `implementations::validators`: validator set with NFT-backed entries
//! - `implementations::proofs`: digest-based proof generator and verifier
//! - `registry`: lookup of execution-chain clients by chain ID

pub mod registry;

pub mod implementations {
	pub mod execution;
	pub mod proofs;
	pub mod settlement;
	pub mod validators;
}

pub use implementations::execution::LocalExecutionChain;
pub use implementations::proofs::{DigestProofSystem, PROOF_SYSTEM};
pub use implementations::settlement::{LocalSettlementChain, SignatureCheck};
pub use implementations::validators::{InMemoryValidatorSet, ValidatorEntry};
pub use registry::ChainRegistry;
