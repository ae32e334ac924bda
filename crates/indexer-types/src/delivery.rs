//! Transaction types for the indexer's outbound chain calls.

use std::fmt;

/// Blockchain transaction hash representation.
///
/// Stores transaction hashes as raw bytes; rendered as `0x`-prefixed hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TransactionHash(pub Vec<u8>);

impl TransactionHash {
	/// Short form for log lines.
	pub fn truncated(&self) -> String {
		let hash_str = hex::encode(&self.0);
		if hash_str.len() <= 8 {
			hash_str
		} else {
			format!("{}..", &hash_str[..8])
		}
	}
}

impl fmt::Display for TransactionHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{}", hex::encode(&self.0))
	}
}
