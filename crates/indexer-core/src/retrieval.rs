//! Read side of the offer store, as served over HTTP.

use indexer_storage::{OfferStore, StorageError};
use indexer_types::{DataResponse, MatchesResponse, RequestId, NO_DATA_MESSAGE};
use std::sync::Arc;
use thiserror::Error;

/// Longest request id accepted from callers.
const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Debug, Error)]
pub enum RetrievalError {
	#[error("invalid request id: {0}")]
	InvalidRequest(String),
	#[error("{}", NO_DATA_MESSAGE)]
	NotFound,
	#[error("storage error: {0}")]
	Storage(#[from] StorageError),
}

#[derive(Clone)]
pub struct RetrievalService {
	store: Arc<OfferStore>,
}

impl RetrievalService {
	pub fn new(store: Arc<OfferStore>) -> Self {
		Self { store }
	}

	/// TDs offered for `request_id`, merged from both store layers.
	pub async fn get(&self, request_id: &str) -> Result<DataResponse, RetrievalError> {
		let request_id = parse_request_id(request_id)?;
		let tds = self.store.get(&request_id).await?;
		if tds.is_empty() {
			return Err(RetrievalError::NotFound);
		}
		Ok(DataResponse::new(request_id, tds))
	}

	/// TDs the durable layer holds for `request_id`, ignoring offers that
	/// only made it into memory.
	pub async fn durable_matches(&self, request_id: &str) -> Result<MatchesResponse, RetrievalError> {
		let request_id = parse_request_id(request_id)?;
		let tds = self.store.durable_matches(&request_id).await?;
		if tds.is_empty() {
			return Err(RetrievalError::NotFound);
		}
		Ok(MatchesResponse::new(request_id, tds))
	}

	/// Reachability of the durable layer.
	pub async fn health(&self) -> Result<(), StorageError> {
		self.store.health_check().await
	}
}

fn parse_request_id(raw: &str) -> Result<RequestId, RetrievalError> {
	let request_id = RequestId::from(raw);
	if request_id.is_blank() {
		return Err(RetrievalError::InvalidRequest("request id is empty".to_string()));
	}
	if raw.len() > MAX_REQUEST_ID_LEN {
		return Err(RetrievalError::InvalidRequest(format!(
			"request id longer than {} characters",
			MAX_REQUEST_ID_LEN
		)));
	}
	if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
		return Err(RetrievalError::InvalidRequest(
			"request id contains whitespace".to_string(),
		));
	}
	Ok(request_id)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::BrokenStorage;
	use indexer_storage::implementations::memory::MemoryStorage;
	use indexer_types::{Identity, TdId, ThingDescription};
	use serde_json::json;

	fn td(id: i64) -> ThingDescription {
		ThingDescription::from_document(TdId(id), json!({"@type": "Sensor"})).unwrap()
	}

	#[tokio::test]
	async fn test_found_and_not_found() {
		let store = Arc::new(OfferStore::new(
			Identity::new("did:example:indexer"),
			Arc::new(MemoryStorage::new()),
		));
		store.record(&RequestId::from("req-1"), &[td(1)]).await;
		let service = RetrievalService::new(store);

		let response = service.get("req-1").await.unwrap();
		assert_eq!(response.count, 1);
		assert_eq!(response.request_id.as_str(), "req-1");

		assert!(matches!(
			service.get("req-x").await,
			Err(RetrievalError::NotFound)
		));
	}

	#[tokio::test]
	async fn test_durable_matches_skip_memory_only_offers() {
		let durable = Arc::new(MemoryStorage::new());
		let store = Arc::new(OfferStore::new(
			Identity::new("did:example:indexer"),
			durable.clone(),
		));
		store.record(&RequestId::from("req-1"), &[td(1), td(2)]).await;
		durable.remove_document(TdId(2));
		let service = RetrievalService::new(store);

		let response = service.durable_matches("req-1").await.unwrap();
		assert_eq!(response.count, 1);
		assert_eq!(response.matches, vec![json!({"@type": "Sensor"})]);
		assert_eq!(service.get("req-1").await.unwrap().count, 2);

		let offline = RetrievalService::new(Arc::new(OfferStore::new(
			Identity::new("did:example:indexer"),
			Arc::new(BrokenStorage),
		)));
		offline.store.record(&RequestId::from("req-1"), &[td(1)]).await;
		assert!(matches!(
			offline.durable_matches("req-1").await,
			Err(RetrievalError::Storage(_))
		));
		assert!(matches!(
			service.durable_matches("req-9").await,
			Err(RetrievalError::NotFound)
		));
	}

	#[tokio::test]
	async fn test_malformed_ids_are_invalid() {
		let service = RetrievalService::new(Arc::new(OfferStore::new(
			Identity::new("did:example:indexer"),
			Arc::new(MemoryStorage::new()),
		)));

		let long = "a".repeat(129);
		for raw in ["", "   ", "req 1", long.as_str()] {
			assert!(
				matches!(service.get(raw).await, Err(RetrievalError::InvalidRequest(_))),
				"accepted {:?}",
				raw
			);
		}
	}

	#[tokio::test]
	async fn test_storage_failure_without_memory_entry() {
		let service = RetrievalService::new(Arc::new(OfferStore::new(
			Identity::new("did:example:indexer"),
			Arc::new(BrokenStorage),
		)));
		assert!(matches!(
			service.get("req-1").await,
			Err(RetrievalError::Storage(_))
		));
		assert!(service.health().await.is_err());
	}
}
