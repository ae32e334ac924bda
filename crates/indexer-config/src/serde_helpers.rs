//! Serde helpers for configuration deserialization

use alloy::primitives::U256;
use serde::{Deserialize, Deserializer, Serializer};
use std::str::FromStr;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAmount {
	Number(u64),
	Text(String),
}

/// Deserializes a token amount given either as a TOML integer or as a decimal
/// or `0x`-prefixed string (for values beyond `u64`).
pub fn deserialize_amount<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
	D: Deserializer<'de>,
{
	match RawAmount::deserialize(deserializer)? {
		RawAmount::Number(n) => Ok(U256::from(n)),
		RawAmount::Text(s) => U256::from_str(s.trim())
			.map_err(|_| serde::de::Error::custom(format!("Invalid token amount: {}", s))),
	}
}

/// Serializes a token amount as a decimal string.
pub fn serialize_amount<S>(amount: &U256, serializer: S) -> Result<S::Ok, S::Error>
where
	S: Serializer,
{
	serializer.serialize_str(&amount.to_string())
}
