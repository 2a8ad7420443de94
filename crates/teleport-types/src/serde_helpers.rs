//! Serde adapters for byte fields rendered as hex strings.

/// Serializes `Vec<u8>` as a lowercase hex string without prefix.
pub mod hex_bytes {
	use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&hex::encode(bytes))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
		let s = String::deserialize(deserializer)?;
		let raw = s.strip_prefix("0x").unwrap_or(&s);
		hex::decode(raw).map_err(D::Error::custom)
	}
}

/// Same as [`hex_bytes`] for a list of byte strings.
pub mod hex_bytes_vec {
	use serde::{de::Error as _, ser::SerializeSeq, Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(items: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
		let mut seq = serializer.serialize_seq(Some(items.len()))?;
		for item in items {
			seq.serialize_element(&hex::encode(item))?;
		}
		seq.end()
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(
		deserializer: D,
	) -> Result<Vec<Vec<u8>>, D::Error> {
		let items = Vec::<String>::deserialize(deserializer)?;
		items
			.iter()
			.map(|s| hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(D::Error::custom))
			.collect()
	}
}

/// Optional variant of [`hex_bytes`].
pub mod hex_bytes_opt {
	use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(
		bytes: &Option<Vec<u8>>,
		serializer: S,
	) -> Result<S::Ok, S::Error> {
		match bytes {
			Some(b) => serializer.serialize_some(&hex::encode(b)),
			None => serializer.serialize_none(),
		}
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(
		deserializer: D,
	) -> Result<Option<Vec<u8>>, D::Error> {
		let s = Option::<String>::deserialize(deserializer)?;
		s.map(|s| hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(D::Error::custom))
			.transpose()
	}
}
