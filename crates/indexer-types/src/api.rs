//! Payloads of the HTTP retrieval API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{RequestId, ThingDescription};

/// Fixed error message for requests that have no offered TDs.
pub const NO_DATA_MESSAGE: &str = "no data available for this request";

/// Message of the 404 returned by `GET /response/{requestId}`.
pub const NO_MATCHES_MESSAGE: &str = "no matches found for this request";

/// Successful response of `GET /data/{requestId}`.
#[derive(Debug, Clone, Serialize)]
pub struct DataResponse {
	#[serde(rename = "requestId")]
	pub request_id: RequestId,
	pub count: usize,
	pub data: Vec<ThingDescription>,
}

impl DataResponse {
	pub fn new(request_id: RequestId, data: Vec<ThingDescription>) -> Self {
		Self {
			request_id,
			count: data.len(),
			data,
		}
	}
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
	pub error: String,
	/// Internal detail, only populated in debug mode.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub details: Option<String>,
}

impl ErrorResponse {
	pub fn new(error: impl Into<String>) -> Self {
		Self {
			error: error.into(),
			details: None,
		}
	}

	pub fn with_details(mut self, details: impl Into<String>) -> Self {
		self.details = Some(details.into());
		self
	}
}

/// Durable matches of a request as served by `GET /response/{requestId}`.
///
/// Carries the bare TD documents rather than catalog entries.
#[derive(Debug, Clone, Serialize)]
pub struct MatchesResponse {
	#[serde(rename = "requestId")]
	pub request_id: RequestId,
	pub matches: Vec<Value>,
	pub count: usize,
	pub timestamp: DateTime<Utc>,
}

impl MatchesResponse {
	pub fn new(request_id: RequestId, tds: Vec<ThingDescription>) -> Self {
		let matches: Vec<Value> = tds.into_iter().map(|td| td.document).collect();
		Self {
			request_id,
			count: matches.len(),
			matches,
			timestamp: Utc::now(),
		}
	}
}

/// Body of a `/response` miss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
	pub message: String,
}

impl MessageResponse {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
		}
	}
}
