//! Thing Description catalog and type matching.
//!
//! Matching is two-phase: the backend first resolves the identifiers of TDs
//! whose `@type` contains the required type, then each identifier is hydrated
//! into its document. Backends implement [`CatalogInterface`];
//! [`CatalogService`] turns backend failures into empty match sets so that a
//! catalog outage never stops request processing.

use async_trait::async_trait;
use indexer_types::{validate_document, TdError, TdId, ThingDescription};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod implementations {
	pub mod memory;
	pub mod postgres;
}

#[derive(Debug, Error)]
pub enum CatalogError {
	#[error("Invalid TD: {0}")]
	InvalidDocument(#[from] TdError),
	#[error("Backend error: {0}")]
	Backend(String),
}

impl From<sqlx::Error> for CatalogError {
	fn from(e: sqlx::Error) -> Self {
		CatalogError::Backend(e.to_string())
	}
}

/// Storage backend for Thing Descriptions.
#[async_trait]
pub trait CatalogInterface: Send + Sync {
	/// Identifiers of TDs whose `@type` is, or contains, `required_type`.
	async fn find_td_ids_by_type(&self, required_type: &str) -> Result<Vec<TdId>, CatalogError>;

	/// The stored document, or `None` when the TD no longer exists.
	async fn get_td(&self, id: TdId) -> Result<Option<Value>, CatalogError>;

	async fn insert_td(&self, document: &Value) -> Result<TdId, CatalogError>;
}

/// Type matching over a catalog backend.
///
/// Query failures never reach the caller: an unreachable catalog is treated
/// as having no compatible TDs.
pub struct CatalogService {
	backend: Arc<dyn CatalogInterface>,
}

impl CatalogService {
	pub fn new(backend: Arc<dyn CatalogInterface>) -> Self {
		Self { backend }
	}

	/// Returns every TD compatible with `required_type`, each exactly once.
	///
	/// Never fails: backend errors are logged and yield no matches.
	pub async fn find_compatible(&self, required_type: &str) -> Vec<ThingDescription> {
		if required_type.trim().is_empty() {
			return Vec::new();
		}

		let ids = match self.backend.find_td_ids_by_type(required_type).await {
			Ok(ids) => ids,
			Err(e) => {
				warn!(required_type, "Catalog lookup failed, treating as no match: {}", e);
				return Vec::new();
			}
		};

		let mut seen = HashSet::with_capacity(ids.len());
		let mut matches = Vec::with_capacity(ids.len());
		for id in ids {
			if !seen.insert(id) {
				continue;
			}

			let document = match self.backend.get_td(id).await {
				Ok(Some(document)) => document,
				Ok(None) => {
					debug!(td_id = %id, "TD disappeared before hydration");
					continue;
				}
				Err(e) => {
					warn!(required_type, "Catalog hydration failed, treating as no match: {}", e);
					return Vec::new();
				}
			};

			match ThingDescription::from_document(id, document) {
				Ok(td) if td.has_type(required_type) => matches.push(td),
				Ok(_) => debug!(td_id = %id, "TD no longer carries the required type"),
				Err(e) => warn!(td_id = %id, "Skipping stored TD: {}", e),
			}
		}

		debug!(required_type, matches = matches.len(), "Catalog lookup finished");
		matches
	}

	/// Validates and stores a TD document.
	pub async fn ingest(&self, document: &Value) -> Result<TdId, CatalogError> {
		validate_document(document)?;
		let id = self.backend.insert_td(document).await?;
		info!(td_id = %id, "TD stored");
		Ok(id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::implementations::memory::MemoryCatalog;
	use serde_json::json;

	struct FailingCatalog;

	#[async_trait]
	impl CatalogInterface for FailingCatalog {
		async fn find_td_ids_by_type(&self, _t: &str) -> Result<Vec<TdId>, CatalogError> {
			Err(CatalogError::Backend("connection refused".to_string()))
		}

		async fn get_td(&self, _id: TdId) -> Result<Option<Value>, CatalogError> {
			Err(CatalogError::Backend("connection refused".to_string()))
		}

		async fn insert_td(&self, _document: &Value) -> Result<TdId, CatalogError> {
			Err(CatalogError::Backend("connection refused".to_string()))
		}
	}

	/// Returns ids that were never stored, and the same id twice.
	struct StaleIndex(MemoryCatalog);

	#[async_trait]
	impl CatalogInterface for StaleIndex {
		async fn find_td_ids_by_type(&self, t: &str) -> Result<Vec<TdId>, CatalogError> {
			let mut ids = self.0.find_td_ids_by_type(t).await?;
			ids.push(TdId(999));
			let repeated = ids.clone();
			ids.extend(repeated);
			Ok(ids)
		}

		async fn get_td(&self, id: TdId) -> Result<Option<Value>, CatalogError> {
			self.0.get_td(id).await
		}

		async fn insert_td(&self, document: &Value) -> Result<TdId, CatalogError> {
			self.0.insert_td(document).await
		}
	}

	async fn seeded() -> CatalogService {
		let service = CatalogService::new(Arc::new(MemoryCatalog::new()));
		service
			.ingest(&json!({"@type": "Sensor", "title": "gauge"}))
			.await
			.unwrap();
		service
			.ingest(&json!({"@type": ["Actuator"], "title": "valve"}))
			.await
			.unwrap();
		service
			.ingest(&json!({"@type": ["Actuator", "Sensor"], "title": "smart valve"}))
			.await
			.unwrap();
		service
	}

	#[tokio::test]
	async fn test_scalar_and_list_types_match_once() {
		let service = seeded().await;

		let sensors = service.find_compatible("Sensor").await;
		let ids: Vec<_> = sensors.iter().map(|td| td.id).collect();
		assert_eq!(ids, vec![TdId(1), TdId(3)]);

		let actuators = service.find_compatible("Actuator").await;
		assert_eq!(actuators.len(), 2);
		assert!(service.find_compatible("Thermostat").await.is_empty());
	}

	#[tokio::test]
	async fn test_blank_type_matches_nothing() {
		let service = seeded().await;
		assert!(service.find_compatible("").await.is_empty());
		assert!(service.find_compatible("   ").await.is_empty());
	}

	#[tokio::test]
	async fn test_backend_failure_is_no_match() {
		let service = CatalogService::new(Arc::new(FailingCatalog));
		assert!(service.find_compatible("Sensor").await.is_empty());
	}

	#[tokio::test]
	async fn test_stale_and_repeated_ids_are_skipped() {
		let memory = MemoryCatalog::new();
		memory.insert_td(&json!({"@type": "Sensor"})).await.unwrap();
		let service = CatalogService::new(Arc::new(StaleIndex(memory)));

		let matches = service.find_compatible("Sensor").await;
		assert_eq!(matches.len(), 1);
		assert_eq!(matches[0].id, TdId(1));
	}

	#[tokio::test]
	async fn test_ingest_rejects_documents_without_type() {
		let service = CatalogService::new(Arc::new(MemoryCatalog::new()));
		let err = service.ingest(&json!({"title": "lamp"})).await.unwrap_err();
		assert!(matches!(err, CatalogError::InvalidDocument(TdError::MissingType)));
	}
}
