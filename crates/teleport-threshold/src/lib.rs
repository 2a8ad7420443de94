//! Threshold key management and signing for teleport validators.
//!
//! [`ThresholdSessionManager`] runs distributed key generation, resharing,
//! refresh and threshold Schnorr signing over the Ristretto group. Round
//! messages travel over a [`RoundTransport`]; key shares and signatures are
//! persisted through the node's storage service.

pub mod crypto;
pub mod error;
mod keygen;
pub mod keys;
pub mod manager;
mod rounds;
pub mod signer;
mod signing;
pub mod transport;

pub use error::ThresholdError;
pub use keys::{GroupPublicKey, KeyShare, SignatureRecord};
pub use manager::{SessionRequest, ThresholdSessionManager, ThresholdStats};
pub use signer::ThresholdSigner;
pub use transport::{Envelope, InMemoryTransport, Payload, RoundTransport, TransportError};

/// Verifies a 64-byte group signature over `keccak256(message)`.
pub fn verify_signature(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
	let (Some(key), Some(sig)) = (
		crypto::decode_point(public_key),
		crypto::Signature::from_bytes(signature),
	) else {
		return false;
	};
	crypto::verify(&key, &teleport_types::keccak256(message), &sig)
}
