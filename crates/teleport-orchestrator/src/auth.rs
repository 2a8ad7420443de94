//! Ed25519 intent authentication.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use teleport_types::{Address, IntentAuthenticator, TeleportIntent};

/// Accepts intents whose sender is a 32-byte Ed25519 verifying key and whose
/// signature covers [`TeleportIntent::signing_hash`].
#[derive(Debug, Default, Clone)]
pub struct Ed25519IntentAuthenticator;

impl IntentAuthenticator for Ed25519IntentAuthenticator {
	fn authenticate(&self, intent: &TeleportIntent) -> bool {
		let Ok(key_bytes) = <[u8; 32]>::try_from(intent.sender.as_bytes()) else {
			return false;
		};
		let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
			return false;
		};
		let Ok(signature) = Signature::from_slice(&intent.signature) else {
			return false;
		};
		key.verify(&intent.signing_hash(), &signature).is_ok()
	}
}

/// Sender address of intents signed by `key`.
pub fn sender_address(key: &SigningKey) -> Address {
	Address(key.verifying_key().to_bytes().to_vec())
}

/// Signs `intent` in place with `key`.
pub fn sign_intent(key: &SigningKey, intent: &mut TeleportIntent) {
	intent.signature = key.sign(&intent.signing_hash()).to_bytes().to_vec();
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::{Duration, Utc};
	use rand::rngs::OsRng;
	use std::collections::BTreeMap;
	use teleport_types::{AssetIdentifier, Id, IntentType};

	fn intent(sender: Address) -> TeleportIntent {
		TeleportIntent {
			id: Id([1; 32]),
			intent_type: IntentType::Bridge,
			source_asset: AssetIdentifier::new("c-chain".into(), Id([2; 32])),
			dest_asset: AssetIdentifier::new("x-chain".into(), Id([2; 32])),
			amount: 10,
			sender,
			recipient: Address(vec![4; 20]),
			deadline: Utc::now() + Duration::minutes(1),
			signature: Vec::new(),
			metadata: BTreeMap::new(),
		}
	}

	#[test]
	fn test_signed_intent_authenticates() {
		let key = SigningKey::generate(&mut OsRng);
		let mut i = intent(sender_address(&key));
		sign_intent(&key, &mut i);
		assert!(Ed25519IntentAuthenticator.authenticate(&i));

		i.amount += 1;
		assert!(!Ed25519IntentAuthenticator.authenticate(&i));
	}

	#[test]
	fn test_foreign_sender_rejected() {
		let key = SigningKey::generate(&mut OsRng);
		let other = SigningKey::generate(&mut OsRng);
		let mut i = intent(sender_address(&other));
		sign_intent(&key, &mut i);
		assert!(!Ed25519IntentAuthenticator.authenticate(&i));

		i.sender = Address(vec![1; 20]);
		assert!(!Ed25519IntentAuthenticator.authenticate(&i));
	}
}
