//! Per-request offer state machine.
//!
//! Received -> Matched | NoMatch -> Offered | Failed -> Persisted.
//! A request is claimed on arrival; the claim is released when the request
//! ends in NoMatch or Failed so that a redelivery is evaluated again, and
//! kept once an offer has been sent.

use crate::event_bus::EventBus;
use dashmap::DashSet;
use indexer_catalog::CatalogService;
use indexer_chain::ChainService;
use indexer_storage::OfferStore;
use indexer_types::{
	Identity, IndexerEvent, OfferEvent, OnChainAction, OnChainLogEntry, Request, RequestEvent,
	RequestId, TransactionHash,
};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferOutcome {
	/// No compatible TD; nothing was sent or stored.
	NoMatch,
	/// Already in flight or offered by this instance.
	Duplicate,
	/// The offer transaction failed; nothing was stored.
	Failed(String),
	/// Offered on-chain; `persisted` is false when only the memory layer was
	/// written.
	Offered {
		tx_hash: TransactionHash,
		persisted: bool,
	},
}

/// Runs a resolved request through matching, the on-chain offer and
/// recording.
///
/// Shared by every worker; handlers for the same request may overlap, and the
/// claim set makes sure only one of them reaches the chain.
pub struct OfferCoordinator {
	identity: Identity,
	chain: Arc<ChainService>,
	catalog: Arc<CatalogService>,
	store: Arc<OfferStore>,
	event_bus: EventBus,
	claims: DashSet<RequestId>,
}

impl OfferCoordinator {
	pub fn new(
		chain: Arc<ChainService>,
		catalog: Arc<CatalogService>,
		store: Arc<OfferStore>,
		event_bus: EventBus,
	) -> Self {
		Self {
			identity: store.identity().clone(),
			chain,
			catalog,
			store,
			event_bus,
			claims: DashSet::new(),
		}
	}

	/// Handles one request end to end. Never fails; the outcome says how far
	/// the request got.
	pub async fn handle(&self, request: Request) -> OfferOutcome {
		let Request {
			request_id,
			required_type,
		} = request;

		self.publish(IndexerEvent::Request(RequestEvent::Received {
			request_id: request_id.clone(),
			required_type: required_type.clone(),
		}));

		if !self.claims.insert(request_id.clone()) {
			info!(request_id = %request_id, "Request already handled by this indexer, skipping");
			self.publish(IndexerEvent::Request(RequestEvent::Duplicate { request_id }));
			return OfferOutcome::Duplicate;
		}

		let matches = self.catalog.find_compatible(&required_type).await;
		if matches.is_empty() {
			info!(request_id = %request_id, required_type = %required_type, "No compatible TD");
			self.claims.remove(&request_id);
			self.publish(IndexerEvent::Request(RequestEvent::NoMatch { request_id }));
			return OfferOutcome::NoMatch;
		}

		info!(
			request_id = %request_id,
			required_type = %required_type,
			matches = matches.len(),
			"Compatible TDs found, applying to request"
		);
		self.publish(IndexerEvent::Request(RequestEvent::Matched {
			request_id: request_id.clone(),
			matches: matches.len(),
		}));

		let tx_hash = match self.chain.offer(&self.identity, &request_id).await {
			Ok(hash) => hash,
			Err(e) => {
				error!(request_id = %request_id, "Offer failed: {}", e);
				self.claims.remove(&request_id);
				self.publish(IndexerEvent::Offer(OfferEvent::Failed {
					request_id,
					error: e.to_string(),
				}));
				return OfferOutcome::Failed(e.to_string());
			}
		};

		info!(request_id = %request_id, tx_hash = %tx_hash, "Offer confirmed");
		self.publish(IndexerEvent::Offer(OfferEvent::Offered {
			request_id: request_id.clone(),
			tx_hash: tx_hash.clone(),
		}));

		let recorded = self.store.record(&request_id, &matches).await;
		let persisted = match recorded.durable {
			Ok(rows) => {
				info!(
					request_id = %request_id,
					td_ids = ?recorded.offer.td_ids,
					rows,
					"Offer recorded"
				);
				self.publish(IndexerEvent::Offer(OfferEvent::Persisted {
					request_id: request_id.clone(),
					rows,
				}));
				true
			}
			Err(e) => {
				error!(
					request_id = %request_id,
					"Durable persistence failed, offer kept in memory only: {}",
					e
				);
				self.publish(IndexerEvent::Offer(OfferEvent::PersistFailed {
					request_id: request_id.clone(),
					error: e.to_string(),
				}));
				false
			}
		};

		let audit = OnChainLogEntry::new(
			request_id.as_str(),
			OnChainAction::ApplyToRequest,
			Some(tx_hash.clone()),
		);
		if let Err(e) = self.store.log_action(&audit).await {
			warn!(request_id = %request_id, "Failed to write on-chain log: {}", e);
		}

		OfferOutcome::Offered { tx_hash, persisted }
	}

	fn publish(&self, event: IndexerEvent) {
		self.event_bus.publish(event).ok();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{catalog_with, BrokenStorage, MockChain, StalledAuditLog};
	use std::time::Duration;
	use indexer_storage::implementations::memory::MemoryStorage;
	use indexer_storage::StorageInterface;
	use serde_json::json;
	use std::sync::atomic::Ordering;

	struct Harness {
		chain: Arc<MockChain>,
		durable: Arc<MemoryStorage>,
		store: Arc<OfferStore>,
		coordinator: OfferCoordinator,
	}

	async fn harness(durable_backend: Option<Arc<dyn StorageInterface>>) -> Harness {
		let chain = Arc::new(MockChain::new());
		let durable = Arc::new(MemoryStorage::new());
		let backend = durable_backend.unwrap_or_else(|| durable.clone() as Arc<dyn StorageInterface>);
		let store = Arc::new(OfferStore::new(Identity::new("did:example:indexer"), backend));
		let catalog = catalog_with(vec![
			json!({"@type": "Sensor", "title": "gauge"}),
			json!({"@type": ["Actuator"], "title": "valve"}),
		])
		.await;
		let coordinator = OfferCoordinator::new(
			Arc::new(ChainService::new(chain.clone())),
			catalog,
			store.clone(),
			EventBus::new(64),
		);
		Harness {
			chain,
			durable,
			store,
			coordinator,
		}
	}

	#[tokio::test]
	async fn test_match_is_offered_and_persisted() {
		let h = harness(None).await;

		let outcome = h.coordinator.handle(Request::new("req-1", "Sensor")).await;
		assert!(matches!(outcome, OfferOutcome::Offered { persisted: true, .. }));
		assert_eq!(h.chain.offers.load(Ordering::SeqCst), 1);

		let stored = h.durable.find_tds_by_request(&RequestId::from("req-1")).await.unwrap();
		assert_eq!(stored.len(), 1);
		assert_eq!(stored[0].id.0, 1);

		let log = h.durable.log_entries().await;
		assert_eq!(log.len(), 1);
		assert_eq!(log[0].action, OnChainAction::ApplyToRequest);
	}

	#[tokio::test]
	async fn test_no_match_sends_and_stores_nothing() {
		let h = harness(None).await;

		let outcome = h.coordinator.handle(Request::new("req-x", "Thermostat")).await;
		assert_eq!(outcome, OfferOutcome::NoMatch);
		assert_eq!(h.chain.offers.load(Ordering::SeqCst), 0);
		assert_eq!(h.durable.match_count(), 0);
		assert!(h.store.memory_lookup(&RequestId::from("req-x")).is_none());
	}

	#[tokio::test]
	async fn test_failed_offer_is_not_recorded_and_can_be_retried() {
		let h = harness(None).await;
		h.chain.fail_offers.store(true, Ordering::SeqCst);

		let outcome = h.coordinator.handle(Request::new("req-1", "Sensor")).await;
		assert!(matches!(outcome, OfferOutcome::Failed(_)));
		assert_eq!(h.durable.match_count(), 0);
		assert!(h.store.memory_lookup(&RequestId::from("req-1")).is_none());

		h.chain.fail_offers.store(false, Ordering::SeqCst);
		let outcome = h.coordinator.handle(Request::new("req-1", "Sensor")).await;
		assert!(matches!(outcome, OfferOutcome::Offered { .. }));
	}

	#[tokio::test]
	async fn test_redelivered_request_is_offered_once() {
		let h = harness(None).await;

		let first = h.coordinator.handle(Request::new("req-1", "Sensor")).await;
		let second = h.coordinator.handle(Request::new("req-1", "Sensor")).await;
		assert!(matches!(first, OfferOutcome::Offered { .. }));
		assert_eq!(second, OfferOutcome::Duplicate);
		assert_eq!(h.chain.offers.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_overlapping_deliveries_are_offered_once() {
		let h = harness(None).await;
		*h.chain.offer_delay.lock().unwrap() = Some(Duration::from_millis(100));

		let (first, second) = tokio::join!(
			h.coordinator.handle(Request::new("req-1", "Sensor")),
			h.coordinator.handle(Request::new("req-1", "Sensor")),
		);

		let outcomes = [first, second];
		let offered = outcomes
			.iter()
			.filter(|o| matches!(o, OfferOutcome::Offered { .. }))
			.count();
		let duplicates = outcomes
			.iter()
			.filter(|o| **o == OfferOutcome::Duplicate)
			.count();
		assert_eq!(offered, 1);
		assert_eq!(duplicates, 1);
		assert_eq!(h.chain.offers.load(Ordering::SeqCst), 1);
		assert_eq!(h.durable.match_count(), 1);
	}

	#[tokio::test]
	async fn test_offer_is_recorded_before_audit_log_write() {
		let h = harness(Some(Arc::new(StalledAuditLog::default()))).await;
		let request_id = RequestId::from("req-1");

		let recorded = tokio::select! {
			_ = h.coordinator.handle(Request::new("req-1", "Sensor")) => false,
			_ = async {
				while h.store.memory_lookup(&request_id).is_none() {
					tokio::time::sleep(Duration::from_millis(5)).await;
				}
			} => true,
			_ = tokio::time::sleep(Duration::from_secs(2)) => false,
		};
		assert!(recorded);
		assert_eq!(h.store.get(&request_id).await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_durable_failure_keeps_memory_offer() {
		let h = harness(Some(Arc::new(BrokenStorage))).await;

		let outcome = h.coordinator.handle(Request::new("req-2", "Sensor")).await;
		assert!(matches!(outcome, OfferOutcome::Offered { persisted: false, .. }));

		let tds = h.store.get(&RequestId::from("req-2")).await.unwrap();
		assert_eq!(tds.len(), 1);
	}

	#[tokio::test]
	async fn test_transitions_are_published() {
		let h = harness(None).await;
		let mut events = h.coordinator.event_bus.subscribe();

		h.coordinator.handle(Request::new("req-1", "Sensor")).await;

		let mut kinds = Vec::new();
		while let Ok(event) = events.try_recv() {
			kinds.push(match event {
				IndexerEvent::Request(RequestEvent::Received { .. }) => "received",
				IndexerEvent::Request(RequestEvent::Matched { .. }) => "matched",
				IndexerEvent::Offer(OfferEvent::Offered { .. }) => "offered",
				IndexerEvent::Offer(OfferEvent::Persisted { .. }) => "persisted",
				_ => "other",
			});
		}
		assert_eq!(kinds, vec!["received", "matched", "offered", "persisted"]);
	}
}
