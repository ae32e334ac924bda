//! Request types read from the request gate contract.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an on-chain request.
///
/// The chain represents it as `bytes32`; everywhere off-chain it is carried as
/// an opaque string (the `0x`-prefixed lowercase hex rendering).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// True when the identifier carries no usable content.
	pub fn is_blank(&self) -> bool {
		self.0.trim().is_empty()
	}
}

impl fmt::Display for RequestId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for RequestId {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

impl From<String> for RequestId {
	fn from(value: String) -> Self {
		Self(value)
	}
}

/// Decentralized identifier the indexer registers and applies with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
	pub fn new(did: impl Into<String>) -> Self {
		Self(did.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Identity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Raw `RequestSubmitted` notification as delivered by the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSubmitted {
	pub request_id: RequestId,
	/// Address of the account that submitted the request.
	pub sender: String,
	/// Block the event was included in, when the client reports it.
	pub block_number: Option<u64>,
}

/// A fully resolved request: the event plus the required semantic type read
/// back from the gate contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
	pub request_id: RequestId,
	pub required_type: String,
}

impl Request {
	pub fn new(request_id: impl Into<RequestId>, required_type: impl Into<String>) -> Self {
		Self {
			request_id: request_id.into(),
			required_type: required_type.into(),
		}
	}
}
