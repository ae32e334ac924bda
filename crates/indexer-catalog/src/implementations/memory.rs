//! In-memory catalog for development and tests.

use crate::{CatalogError, CatalogInterface};
use async_trait::async_trait;
use indexer_types::{normalize_types, TdId, TYPE_FIELD};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Catalog held in a map ordered by id, with ids assigned from 1.
#[derive(Default)]
pub struct MemoryCatalog {
	documents: RwLock<BTreeMap<TdId, Value>>,
}

impl MemoryCatalog {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl CatalogInterface for MemoryCatalog {
	async fn find_td_ids_by_type(&self, required_type: &str) -> Result<Vec<TdId>, CatalogError> {
		let documents = self.documents.read().await;
		Ok(documents
			.iter()
			.filter(|(_, doc)| {
				doc.get(TYPE_FIELD)
					.map(normalize_types)
					.is_some_and(|types| types.iter().any(|t| t == required_type))
			})
			.map(|(id, _)| *id)
			.collect())
	}

	async fn get_td(&self, id: TdId) -> Result<Option<Value>, CatalogError> {
		Ok(self.documents.read().await.get(&id).cloned())
	}

	async fn insert_td(&self, document: &Value) -> Result<TdId, CatalogError> {
		let mut documents = self.documents.write().await;
		let id = TdId(documents.keys().next_back().map_or(1, |last| last.0 + 1));
		documents.insert(id, document.clone());
		Ok(id)
	}
}
