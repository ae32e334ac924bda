//! In-memory durable layer for development and tests.
//!
//! Mirrors the relational backend: one entry per (request, TD) pair, and TDs
//! removed from the catalog drop out of reads.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use dashmap::DashMap;
use indexer_types::{OnChainLogEntry, RequestId, TdId, ThingDescription};
use tokio::sync::Mutex;

#[derive(Default)]
pub struct MemoryStorage {
	matches: DashMap<RequestId, Vec<TdId>>,
	documents: DashMap<TdId, ThingDescription>,
	log: Mutex<Vec<OnChainLogEntry>>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}

	/// Forgets a TD, as if it had been deleted from the catalog.
	pub fn remove_document(&self, id: TdId) {
		self.documents.remove(&id);
	}

	/// Number of stored (request, TD) rows.
	pub fn match_count(&self) -> usize {
		self.matches.iter().map(|entry| entry.value().len()).sum()
	}

	pub async fn log_entries(&self) -> Vec<OnChainLogEntry> {
		self.log.lock().await.clone()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn insert_matches(
		&self,
		request_id: &RequestId,
		tds: &[ThingDescription],
	) -> Result<u64, StorageError> {
		let mut rows = self.matches.entry(request_id.clone()).or_default();
		let mut written = 0;
		for td in tds {
			self.documents.entry(td.id).or_insert_with(|| td.clone());
			if !rows.contains(&td.id) {
				rows.push(td.id);
				written += 1;
			}
		}
		Ok(written)
	}

	async fn find_tds_by_request(
		&self,
		request_id: &RequestId,
	) -> Result<Vec<ThingDescription>, StorageError> {
		let Some(rows) = self.matches.get(request_id) else {
			return Ok(Vec::new());
		};
		Ok(rows
			.iter()
			.filter_map(|id| self.documents.get(id).map(|td| td.clone()))
			.collect())
	}

	async fn log_action(&self, entry: &OnChainLogEntry) -> Result<(), StorageError> {
		self.log.lock().await.push(entry.clone());
		Ok(())
	}

	async fn health_check(&self) -> Result<(), StorageError> {
		Ok(())
	}

	async fn close(&self) {}
}
