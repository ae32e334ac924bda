//! Offer pipeline for the TD indexer.
//!
//! The engine subscribes to submitted requests through the chain gateway and
//! feeds them through a bounded channel to a pool of workers, each running one
//! request through the [`OfferCoordinator`]. Offers end up in the
//! [`OfferStore`], which the [`RetrievalService`] reads for the HTTP API.

use indexer_catalog::CatalogService;
use indexer_chain::{ChainError, ChainService};
use indexer_config::IndexerSettings;
use indexer_storage::{OfferStore, StorageError, StorageInterface};
use indexer_types::{Identity, OnChainAction, OnChainLogEntry, TransactionHash};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

pub mod coordinator;
pub mod event_bus;
pub mod retrieval;

#[cfg(test)]
mod testing;

pub use coordinator::{OfferCoordinator, OfferOutcome};
pub use event_bus::EventBus;
pub use retrieval::{RetrievalError, RetrievalService};

#[derive(Debug, Error)]
pub enum IndexerError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Chain error: {0}")]
	Chain(#[from] ChainError),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

/// A wired indexer: chain gateway, coordinator and offer store.
///
/// Built by [`IndexerBuilder`]. `run` can be called once; the chain
/// subscription it opens is detached for good when it returns.
pub struct IndexerEngine {
	identity: Identity,
	settings: IndexerSettings,
	chain: Arc<ChainService>,
	coordinator: Arc<OfferCoordinator>,
	store: Arc<OfferStore>,
	event_bus: EventBus,
	shutdown_tx: watch::Sender<bool>,
}

impl IndexerEngine {
	/// Registers the indexer identity. Already being registered is not an
	/// error; anything else is.
	pub async fn register(&self) -> Result<Option<TransactionHash>, IndexerError> {
		let hash = self.chain.register(&self.identity).await?;

		if let Some(hash) = &hash {
			let entry = OnChainLogEntry::new(
				self.identity.as_str(),
				OnChainAction::Register,
				Some(hash.clone()),
			);
			if let Err(e) = self.store.log_action(&entry).await {
				warn!("Failed to write on-chain log: {}", e);
			}
		}

		Ok(hash)
	}

	/// Processes submitted requests until [`IndexerEngine::shutdown`] is
	/// called or the request stream ends, then drains in-flight work.
	pub async fn run(&self) -> Result<(), IndexerError> {
		let (request_tx, mut request_rx) = mpsc::channel(self.settings.queue_capacity);
		self.chain.subscribe(request_tx).await?;

		info!(
			identity = %self.identity,
			workers = self.settings.workers,
			queue_capacity = self.settings.queue_capacity,
			"Indexer running"
		);

		let semaphore = Arc::new(Semaphore::new(self.settings.workers));
		let mut workers: JoinSet<OfferOutcome> = JoinSet::new();
		let mut shutdown_rx = self.shutdown_tx.subscribe();

		loop {
			let received = tokio::select! {
				_ = stop_requested(&mut shutdown_rx) => {
					info!("Shutdown requested, no longer accepting requests");
					break;
				}
				Some(joined) = workers.join_next(), if !workers.is_empty() => {
					log_worker_result(joined);
					continue;
				}
				received = request_rx.recv() => received,
			};

			let Some(request) = received else {
				warn!("Request stream closed");
				break;
			};

			let permit = tokio::select! {
				_ = stop_requested(&mut shutdown_rx) => {
					info!(
						request_id = %request.request_id,
						"Shutdown requested while waiting for a free worker, request not started"
					);
					break;
				}
				permit = semaphore.clone().acquire_owned() => match permit {
					Ok(permit) => permit,
					Err(_) => break,
				},
			};

			let coordinator = self.coordinator.clone();
			workers.spawn(async move {
				let _permit = permit;
				coordinator.handle(request).await
			});
		}

		if let Err(e) = self.chain.shutdown().await {
			warn!("Failed to detach request subscription: {}", e);
		}
		drop(request_rx);

		if !workers.is_empty() {
			info!(in_flight = workers.len(), "Draining in-flight requests");
		}
		let drain_timeout = Duration::from_secs(self.settings.drain_timeout_secs);
		let drained = tokio::time::timeout(drain_timeout, async {
			while let Some(joined) = workers.join_next().await {
				log_worker_result(joined);
			}
		})
		.await;

		if drained.is_err() {
			warn!(
				remaining = workers.len(),
				"Drain timeout elapsed, aborting remaining requests"
			);
			workers.abort_all();
			while workers.join_next().await.is_some() {}
		}

		info!("Indexer stopped");
		Ok(())
	}

	/// Asks a running engine to stop. Safe to call more than once.
	pub fn shutdown(&self) {
		self.shutdown_tx.send_replace(true);
	}

	pub fn retrieval(&self) -> RetrievalService {
		RetrievalService::new(self.store.clone())
	}

	pub fn event_bus(&self) -> &EventBus {
		&self.event_bus
	}

	pub fn identity(&self) -> &Identity {
		&self.identity
	}

	/// Releases the durable store. Call after `run` has returned.
	pub async fn close(&self) {
		self.store.close().await;
	}
}

/// Resolves once shutdown has been requested or the sender is gone.
async fn stop_requested(shutdown_rx: &mut watch::Receiver<bool>) {
	let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

fn log_worker_result(joined: Result<OfferOutcome, JoinError>) {
	match joined {
		Ok(outcome) => debug!(?outcome, "Request finished"),
		Err(e) if e.is_panic() => error!("Request handler panicked: {}", e),
		Err(e) => debug!("Request handler cancelled: {}", e),
	}
}

/// Builder for [`IndexerEngine`]. The chain, catalog and storage backends are
/// all required.
pub struct IndexerBuilder {
	settings: IndexerSettings,
	chain: Option<ChainService>,
	catalog: Option<CatalogService>,
	storage: Option<Arc<dyn StorageInterface>>,
	event_capacity: usize,
}

impl IndexerBuilder {
	pub fn new(settings: IndexerSettings) -> Self {
		Self {
			settings,
			chain: None,
			catalog: None,
			storage: None,
			event_capacity: 1000,
		}
	}

	pub fn with_chain(mut self, chain: ChainService) -> Self {
		self.chain = Some(chain);
		self
	}

	pub fn with_catalog(mut self, catalog: CatalogService) -> Self {
		self.catalog = Some(catalog);
		self
	}

	pub fn with_storage(mut self, storage: Arc<dyn StorageInterface>) -> Self {
		self.storage = Some(storage);
		self
	}

	pub fn build(self) -> Result<IndexerEngine, IndexerError> {
		let missing = |what: &str| IndexerError::Config(format!("{} is required", what));

		if self.settings.identity.trim().is_empty() {
			return Err(IndexerError::Config("identity must not be empty".to_string()));
		}
		if self.settings.workers == 0 || self.settings.queue_capacity == 0 {
			return Err(IndexerError::Config(
				"workers and queue_capacity must be at least 1".to_string(),
			));
		}

		let chain = Arc::new(self.chain.ok_or_else(|| missing("chain backend"))?);
		let catalog = Arc::new(self.catalog.ok_or_else(|| missing("catalog"))?);
		let storage = self.storage.ok_or_else(|| missing("storage backend"))?;

		let identity = Identity::new(self.settings.identity.trim());
		let store = Arc::new(OfferStore::new(identity.clone(), storage));
		let event_bus = EventBus::new(self.event_capacity);
		let coordinator = Arc::new(OfferCoordinator::new(
			chain.clone(),
			catalog,
			store.clone(),
			event_bus.clone(),
		));
		let (shutdown_tx, _) = watch::channel(false);

		Ok(IndexerEngine {
			identity,
			settings: self.settings,
			chain,
			coordinator,
			store,
			event_bus,
			shutdown_tx,
		})
	}
}
