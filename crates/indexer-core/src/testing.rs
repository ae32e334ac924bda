//! Test doubles shared by the core tests.

use async_trait::async_trait;
use indexer_catalog::implementations::memory::MemoryCatalog;
use indexer_catalog::CatalogService;
use indexer_chain::{ChainError, ChainInterface};
use indexer_storage::implementations::memory::MemoryStorage;
use indexer_storage::{StorageError, StorageInterface};
use indexer_types::{
	Identity, OnChainLogEntry, Request, RequestId, RequestSubmitted, TransactionHash,
	ThingDescription,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Chain backend that serves requests from a map and counts offers.
#[derive(Default)]
pub(crate) struct MockChain {
	requests: Mutex<HashMap<RequestId, String>>,
	pending: Mutex<Vec<RequestSubmitted>>,
	sender: Mutex<Option<mpsc::Sender<RequestSubmitted>>>,
	pub offers: AtomicUsize,
	pub fail_offers: AtomicBool,
	pub offer_delay: Mutex<Option<Duration>>,
	pub stopped: AtomicBool,
}

impl MockChain {
	pub fn new() -> Self {
		Self::default()
	}

	/// Queues a `RequestSubmitted` event, delivered once monitoring starts.
	pub fn submit(&self, id: &str, required_type: &str) {
		let request_id = RequestId::from(id);
		self.requests
			.lock()
			.unwrap()
			.insert(request_id.clone(), required_type.to_string());
		self.pending.lock().unwrap().push(RequestSubmitted {
			request_id,
			sender: "0x0000000000000000000000000000000000000001".to_string(),
			block_number: None,
		});
	}
}

#[async_trait]
impl ChainInterface for MockChain {
	async fn register(&self, _identity: &Identity) -> Result<TransactionHash, ChainError> {
		Ok(TransactionHash(vec![0x01; 32]))
	}

	async fn get_request(&self, request_id: &RequestId) -> Result<Request, ChainError> {
		let required_type = self.requests.lock().unwrap().get(request_id).cloned();
		required_type
			.map(|t| Request::new(request_id.clone(), t))
			.ok_or_else(|| ChainError::InvalidRequest(request_id.to_string()))
	}

	async fn apply_to_request(
		&self,
		_identity: &Identity,
		_request_id: &RequestId,
	) -> Result<TransactionHash, ChainError> {
		let delay = *self.offer_delay.lock().unwrap();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		if self.fail_offers.load(Ordering::SeqCst) {
			return Err(ChainError::Reverted("request closed".to_string()));
		}
		let n = self.offers.fetch_add(1, Ordering::SeqCst) as u8;
		Ok(TransactionHash(vec![n; 32]))
	}

	async fn start_monitoring(
		&self,
		sender: mpsc::Sender<RequestSubmitted>,
	) -> Result<(), ChainError> {
		let pending: Vec<_> = self.pending.lock().unwrap().drain(..).collect();
		for event in pending {
			sender
				.send(event)
				.await
				.map_err(|e| ChainError::Connection(e.to_string()))?;
		}
		*self.sender.lock().unwrap() = Some(sender);
		Ok(())
	}

	async fn stop_monitoring(&self) -> Result<(), ChainError> {
		self.sender.lock().unwrap().take();
		self.stopped.store(true, Ordering::SeqCst);
		Ok(())
	}
}

/// Durable backend whose every call fails.
pub(crate) struct BrokenStorage;

#[async_trait]
impl StorageInterface for BrokenStorage {
	async fn insert_matches(
		&self,
		_request_id: &RequestId,
		_tds: &[ThingDescription],
	) -> Result<u64, StorageError> {
		Err(StorageError::Backend("connection reset".to_string()))
	}

	async fn find_tds_by_request(
		&self,
		_request_id: &RequestId,
	) -> Result<Vec<ThingDescription>, StorageError> {
		Err(StorageError::Backend("connection reset".to_string()))
	}

	async fn log_action(&self, _entry: &OnChainLogEntry) -> Result<(), StorageError> {
		Err(StorageError::Backend("connection reset".to_string()))
	}

	async fn health_check(&self) -> Result<(), StorageError> {
		Err(StorageError::Backend("connection reset".to_string()))
	}

	async fn close(&self) {}
}

/// Memory backend whose audit-log writes never complete.
#[derive(Default)]
pub(crate) struct StalledAuditLog {
	pub inner: MemoryStorage,
}

#[async_trait]
impl StorageInterface for StalledAuditLog {
	async fn insert_matches(
		&self,
		request_id: &RequestId,
		tds: &[ThingDescription],
	) -> Result<u64, StorageError> {
		self.inner.insert_matches(request_id, tds).await
	}

	async fn find_tds_by_request(
		&self,
		request_id: &RequestId,
	) -> Result<Vec<ThingDescription>, StorageError> {
		self.inner.find_tds_by_request(request_id).await
	}

	async fn log_action(&self, _entry: &OnChainLogEntry) -> Result<(), StorageError> {
		std::future::pending().await
	}

	async fn health_check(&self) -> Result<(), StorageError> {
		self.inner.health_check().await
	}

	async fn close(&self) {}
}

/// Catalog preloaded with `documents`, ids assigned from 1 in order.
pub(crate) async fn catalog_with(documents: Vec<Value>) -> Arc<CatalogService> {
	let catalog = CatalogService::new(Arc::new(MemoryCatalog::new()));
	for document in documents {
		catalog.ingest(&document).await.unwrap();
	}
	Arc::new(catalog)
}
