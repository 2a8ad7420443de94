//! Identifier and address types shared by every teleport component.
//!
//! Hash-derived identifiers (assets, keys, intents, transactions) are 32-byte
//! values rendered as hex. Record identifiers minted locally (transfers,
//! settlements, sessions) are random UUIDs so they are never reused.

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identifier of a transfer lifecycle record.
pub type TransferId = uuid::Uuid;
/// Identifier of a settlement record.
pub type SettlementId = uuid::Uuid;
/// Identifier of a threshold protocol session.
pub type SessionId = uuid::Uuid;

/// Errors produced when parsing identifiers from text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdParseError {
	#[error("Invalid hex: {0}")]
	InvalidHex(String),
	#[error("Invalid length: expected {expected} bytes, got {actual}")]
	InvalidLength { expected: usize, actual: usize },
}

/// Computes the Keccak-256 digest of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
	let digest = Keccak256::digest(data);
	let mut out = [0u8; 32];
	out.copy_from_slice(&digest);
	out
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], IdParseError> {
	let raw = s.strip_prefix("0x").unwrap_or(s);
	let bytes = hex::decode(raw).map_err(|e| IdParseError::InvalidHex(e.to_string()))?;
	let actual = bytes.len();
	bytes.try_into().map_err(|_| IdParseError::InvalidLength {
		expected: N,
		actual,
	})
}

macro_rules! fixed_id {
	($(#[$meta:meta])* $name:ident, $len:expr) => {
		$(#[$meta])*
		#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
		pub struct $name(pub [u8; $len]);

		impl $name {
			/// Generates a random identifier.
			pub fn random() -> Self {
				Self(rand::random())
			}

			pub fn as_bytes(&self) -> &[u8] {
				&self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", hex::encode(self.0))
			}
		}

		impl fmt::Debug for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}({})", stringify!($name), hex::encode(&self.0[..6]))
			}
		}

		impl FromStr for $name {
			type Err = IdParseError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				decode_fixed::<$len>(s).map(Self)
			}
		}

		impl Serialize for $name {
			fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
				serializer.serialize_str(&hex::encode(self.0))
			}
		}

		impl<'de> Deserialize<'de> for $name {
			fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
				let s = String::deserialize(deserializer)?;
				s.parse().map_err(D::Error::custom)
			}
		}
	};
}

fixed_id!(
	/// 32-byte identifier for assets, keys, intents and chain transactions.
	Id,
	32
);

fixed_id!(
	/// 20-byte identifier of a validator node participating in threshold protocols.
	NodeId,
	20
);

impl Id {
	/// Derives an identifier by hashing the concatenation of `parts`.
	pub fn hash_of(parts: &[&[u8]]) -> Self {
		let mut hasher = Keccak256::new();
		for part in parts {
			hasher.update(part);
		}
		let mut out = [0u8; 32];
		out.copy_from_slice(&hasher.finalize());
		Self(out)
	}
}

/// Identifier of a participating chain (settlement, staking or execution chain).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub String);

impl ChainId {
	pub fn new(name: impl Into<String>) -> Self {
		Self(name.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ChainId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ChainId {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

/// Chain-specific account address.
///
/// Stored as raw bytes so both UTXO-style short IDs and account-model
/// addresses fit. Intent senders use the 32-byte Ed25519 verifying key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub Vec<u8>);

impl Address {
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{}", hex::encode(&self.0))
	}
}

impl fmt::Debug for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Address({})", self)
	}
}

impl FromStr for Address {
	type Err = IdParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let raw = s.strip_prefix("0x").unwrap_or(s);
		hex::decode(raw)
			.map(Address)
			.map_err(|e| IdParseError::InvalidHex(e.to_string()))
	}
}

impl From<Vec<u8>> for Address {
	fn from(value: Vec<u8>) -> Self {
		Self(value)
	}
}

impl Serialize for Address {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_string())
	}
}

impl<'de> Deserialize<'de> for Address {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(D::Error::custom)
	}
}
