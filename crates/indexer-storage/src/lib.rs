//! Offer persistence for the TD indexer.
//!
//! An offer is written to two layers. The memory layer keeps, per identity,
//! the ordered list of requests offered during this process lifetime. The
//! durable layer keeps one row per (request, TD) pair behind a uniqueness
//! constraint, so repeated writes of the same match set are no-ops.
//! Reads merge both layers, memory first.

use async_trait::async_trait;
use dashmap::DashMap;
use indexer_types::{
	Identity, Offer, OfferEntry, OnChainLogEntry, RequestId, TdId, ThingDescription,
};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub mod implementations {
	pub mod memory;
	pub mod postgres;
}

#[derive(Debug, Error)]
pub enum StorageError {
	#[error("Backend error: {0}")]
	Backend(String),
	#[error("Migration error: {0}")]
	Migration(String),
}

impl From<sqlx::Error> for StorageError {
	fn from(e: sqlx::Error) -> Self {
		StorageError::Backend(e.to_string())
	}
}

/// Durable backend for offers and the on-chain audit log.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Stores one row per TD, skipping pairs already present.
	///
	/// Returns the number of rows actually written.
	async fn insert_matches(
		&self,
		request_id: &RequestId,
		tds: &[ThingDescription],
	) -> Result<u64, StorageError>;

	/// TDs recorded for the request that still exist, in match order.
	async fn find_tds_by_request(
		&self,
		request_id: &RequestId,
	) -> Result<Vec<ThingDescription>, StorageError>;

	async fn log_action(&self, entry: &OnChainLogEntry) -> Result<(), StorageError>;

	async fn health_check(&self) -> Result<(), StorageError>;

	async fn close(&self);
}

/// Result of recording an offer.
#[derive(Debug)]
pub struct Recorded {
	/// The offer as held in the memory layer.
	pub offer: Offer,
	/// Rows written to the durable layer, or why the write failed.
	pub durable: Result<u64, StorageError>,
}

/// Two-layer offer store.
pub struct OfferStore {
	identity: Identity,
	memory: DashMap<Identity, Vec<OfferEntry>>,
	durable: Arc<dyn StorageInterface>,
}

impl OfferStore {
	pub fn new(identity: Identity, durable: Arc<dyn StorageInterface>) -> Self {
		Self {
			identity,
			memory: DashMap::new(),
			durable,
		}
	}

	pub fn identity(&self) -> &Identity {
		&self.identity
	}

	/// Writes the memory layer, then the durable layer.
	///
	/// The memory write cannot fail, so the offer stays readable for the rest
	/// of the process lifetime even when the durable write does not succeed.
	pub async fn record(&self, request_id: &RequestId, tds: &[ThingDescription]) -> Recorded {
		let entry = OfferEntry::new(request_id.clone(), tds.to_vec());
		let offer = entry.to_offer(&self.identity);
		self.memory
			.entry(self.identity.clone())
			.or_default()
			.push(entry);

		let durable = self.durable.insert_matches(request_id, tds).await;
		if let Ok(rows) = &durable {
			debug!(request_id = %request_id, rows, "Offer persisted");
		}

		Recorded { offer, durable }
	}

	/// First memory entry for the request under this identity.
	pub fn memory_lookup(&self, request_id: &RequestId) -> Option<Vec<ThingDescription>> {
		let entries = self.memory.get(&self.identity)?;
		entries
			.iter()
			.find(|entry| &entry.request_id == request_id)
			.map(|entry| entry.tds.clone())
	}

	/// Offers made by this identity since startup, oldest first.
	pub fn offers(&self) -> Vec<Offer> {
		self.memory
			.get(&self.identity)
			.map(|entries| {
				entries
					.iter()
					.map(|entry| entry.to_offer(&self.identity))
					.collect()
			})
			.unwrap_or_default()
	}

	/// Union of both layers, deduplicated by TD id in first-seen order.
	///
	/// A durable read failure is tolerated when the memory layer already has
	/// the request.
	pub async fn get(&self, request_id: &RequestId) -> Result<Vec<ThingDescription>, StorageError> {
		if request_id.is_blank() {
			return Ok(Vec::new());
		}

		let memory = self.memory_lookup(request_id).unwrap_or_default();
		let durable = match self.durable.find_tds_by_request(request_id).await {
			Ok(tds) => tds,
			Err(e) if !memory.is_empty() => {
				warn!(request_id = %request_id, "Durable read failed, serving memory layer: {}", e);
				Vec::new()
			}
			Err(e) => return Err(e),
		};

		Ok(merge_unique(memory, durable))
	}

	/// Durable matches only, deduplicated by TD id in match order.
	pub async fn durable_matches(
		&self,
		request_id: &RequestId,
	) -> Result<Vec<ThingDescription>, StorageError> {
		if request_id.is_blank() {
			return Ok(Vec::new());
		}
		let tds = self.durable.find_tds_by_request(request_id).await?;
		Ok(merge_unique(tds, Vec::new()))
	}

	pub async fn log_action(&self, entry: &OnChainLogEntry) -> Result<(), StorageError> {
		self.durable.log_action(entry).await
	}

	pub async fn health_check(&self) -> Result<(), StorageError> {
		self.durable.health_check().await
	}

	pub async fn close(&self) {
		self.durable.close().await
	}
}

fn merge_unique(
	first: Vec<ThingDescription>,
	second: Vec<ThingDescription>,
) -> Vec<ThingDescription> {
	let mut seen: HashSet<TdId> = HashSet::new();
	first
		.into_iter()
		.chain(second)
		.filter(|td| seen.insert(td.id))
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::implementations::memory::MemoryStorage;
	use serde_json::json;

	fn td(id: i64, ty: &str) -> ThingDescription {
		ThingDescription::from_document(TdId(id), json!({"@type": ty, "title": id})).unwrap()
	}

	struct BrokenStorage;

	#[async_trait]
	impl StorageInterface for BrokenStorage {
		async fn insert_matches(
			&self,
			_request_id: &RequestId,
			_tds: &[ThingDescription],
		) -> Result<u64, StorageError> {
			Err(StorageError::Backend("pool timed out".to_string()))
		}

		async fn find_tds_by_request(
			&self,
			_request_id: &RequestId,
		) -> Result<Vec<ThingDescription>, StorageError> {
			Err(StorageError::Backend("pool timed out".to_string()))
		}

		async fn log_action(&self, _entry: &OnChainLogEntry) -> Result<(), StorageError> {
			Err(StorageError::Backend("pool timed out".to_string()))
		}

		async fn health_check(&self) -> Result<(), StorageError> {
			Err(StorageError::Backend("pool timed out".to_string()))
		}

		async fn close(&self) {}
	}

	fn store(durable: Arc<dyn StorageInterface>) -> OfferStore {
		OfferStore::new(Identity::new("did:example:indexer"), durable)
	}

	#[tokio::test]
	async fn test_record_then_get() {
		let store = store(Arc::new(MemoryStorage::new()));
		let request = RequestId::from("req-1");

		let recorded = store.record(&request, &[td(1, "Sensor")]).await;
		assert_eq!(recorded.durable.unwrap(), 1);
		assert_eq!(recorded.offer.td_ids, vec![TdId(1)]);

		let first = store.get(&request).await.unwrap();
		let second = store.get(&request).await.unwrap();
		assert_eq!(first, second);
		assert_eq!(first.len(), 1);
	}

	#[tokio::test]
	async fn test_td_in_both_layers_returned_once() {
		let durable = Arc::new(MemoryStorage::new());
		let request = RequestId::from("req-1");
		durable
			.insert_matches(&request, &[td(1, "Sensor"), td(2, "Sensor")])
			.await
			.unwrap();

		let store = store(durable);
		store.record(&request, &[td(2, "Sensor"), td(3, "Sensor")]).await;

		let ids: Vec<_> = store.get(&request).await.unwrap().iter().map(|t| t.id).collect();
		assert_eq!(ids, vec![TdId(2), TdId(3), TdId(1)]);
	}

	#[tokio::test]
	async fn test_memory_lookup_earliest_entry_wins() {
		let store = store(Arc::new(MemoryStorage::new()));
		let request = RequestId::from("req-1");
		store.record(&request, &[td(1, "Sensor")]).await;
		store.record(&request, &[td(2, "Sensor")]).await;

		let memory = store.memory_lookup(&request).unwrap();
		assert_eq!(memory.len(), 1);
		assert_eq!(memory[0].id, TdId(1));
		assert_eq!(store.offers().len(), 2);
	}

	#[tokio::test]
	async fn test_durable_failure_served_from_memory() {
		let store = store(Arc::new(BrokenStorage));
		let request = RequestId::from("req-2");

		let recorded = store.record(&request, &[td(5, "Sensor")]).await;
		assert!(recorded.durable.is_err());

		let tds = store.get(&request).await.unwrap();
		assert_eq!(tds.len(), 1);
		assert_eq!(tds[0].id, TdId(5));

		assert!(store.get(&RequestId::from("req-unknown")).await.is_err());
	}

	#[tokio::test]
	async fn test_blank_request_is_empty() {
		let store = store(Arc::new(BrokenStorage));
		assert!(store.get(&RequestId::from("  ")).await.unwrap().is_empty());
	}
}
