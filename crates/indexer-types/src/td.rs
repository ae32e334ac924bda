//! Thing Description types.
//!
//! A Thing Description (TD) is a JSON document describing a device. The only
//! field the indexer interprets is `@type`, which may be either a single string
//! or a list of strings.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Name of the semantic type field inside a TD document.
pub const TYPE_FIELD: &str = "@type";

/// Catalog identifier of a stored TD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TdId(pub i64);

impl fmt::Display for TdId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TdError {
	#[error("TD must be a JSON object")]
	NotAnObject,
	#[error("TD must contain a non-empty @type field")]
	MissingType,
}

/// A stored Thing Description with its normalized type list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThingDescription {
	pub id: TdId,
	/// Normalized `@type`; never empty.
	#[serde(skip)]
	pub types: Vec<String>,
	/// The full document as stored in the catalog.
	#[serde(rename = "td")]
	pub document: Value,
}

impl ThingDescription {
	/// Builds a TD from a stored document, normalizing its type field.
	pub fn from_document(id: TdId, document: Value) -> Result<Self, TdError> {
		let types = validate_document(&document)?;
		Ok(Self {
			id,
			types,
			document,
		})
	}

	pub fn has_type(&self, required_type: &str) -> bool {
		self.types.iter().any(|t| t == required_type)
	}
}

/// Checks that a document can be stored as a TD and returns its type list.
pub fn validate_document(document: &Value) -> Result<Vec<String>, TdError> {
	if !document.is_object() {
		return Err(TdError::NotAnObject);
	}
	let types = document
		.get(TYPE_FIELD)
		.map(normalize_types)
		.unwrap_or_default();
	if types.is_empty() {
		return Err(TdError::MissingType);
	}
	Ok(types)
}

/// Normalizes a polymorphic `@type` value into a list of type strings.
///
/// A scalar string becomes a one-element list, non-string entries of an array
/// are ignored and repeated entries are kept once.
pub fn normalize_types(value: &Value) -> Vec<String> {
	match value {
		Value::String(s) if !s.is_empty() => vec![s.clone()],
		Value::Array(items) => {
			let mut types: Vec<String> = Vec::with_capacity(items.len());
			for item in items.iter().filter_map(Value::as_str) {
				if !item.is_empty() && !types.iter().any(|t| t == item) {
					types.push(item.to_string());
				}
			}
			types
		}
		_ => Vec::new(),
	}
}
