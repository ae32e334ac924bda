//! Chain gateway for the TD indexer.
//!
//! The gateway owns the RPC connection, the signing key and the registry and
//! request gate contract bindings. Backends implement [`ChainInterface`];
//! [`ChainService`] adds the gateway semantics on top: idempotent registration,
//! request resolution for every submitted event and a one-shot shutdown.

use async_trait::async_trait;
use indexer_types::{Identity, Request, RequestId, RequestSubmitted, TransactionHash};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
}

#[derive(Debug, Error)]
pub enum ChainError {
	#[error("Identity is already registered")]
	AlreadyRegistered,
	#[error(
		"Insufficient stake allowance for spender {spender}: current {current}, required {required}. \
		Approve the registry to spend the stake token before starting the indexer"
	)]
	InsufficientAllowance {
		spender: String,
		current: String,
		required: String,
	},
	#[error("Transaction reverted: {0}")]
	Reverted(String),
	#[error("Provider error: {0}")]
	Provider(String),
	#[error("Invalid request: {0}")]
	InvalidRequest(String),
	#[error("Connection error: {0}")]
	Connection(String),
	#[error("Already monitoring")]
	AlreadyMonitoring,
}

/// Backend for the registry and request gate contracts.
#[async_trait]
pub trait ChainInterface: Send + Sync {
	/// Registers the identity in the indexer registry.
	async fn register(&self, identity: &Identity) -> Result<TransactionHash, ChainError>;

	/// Reads a submitted request back from the gate contract.
	async fn get_request(&self, request_id: &RequestId) -> Result<Request, ChainError>;

	/// Applies to a request and waits for the configured confirmations.
	async fn apply_to_request(
		&self,
		identity: &Identity,
		request_id: &RequestId,
	) -> Result<TransactionHash, ChainError>;

	/// Starts delivering `RequestSubmitted` events to `sender`.
	async fn start_monitoring(
		&self,
		sender: mpsc::Sender<RequestSubmitted>,
	) -> Result<(), ChainError>;

	async fn stop_monitoring(&self) -> Result<(), ChainError>;
}

/// Gateway over a chain backend.
pub struct ChainService {
	backend: Arc<dyn ChainInterface>,
	forwarder: Mutex<Option<JoinHandle<()>>>,
	is_shut_down: AtomicBool,
}

impl ChainService {
	pub fn new(backend: Arc<dyn ChainInterface>) -> Self {
		Self {
			backend,
			forwarder: Mutex::new(None),
			is_shut_down: AtomicBool::new(false),
		}
	}

	/// Registers the identity, returning `None` when it is already registered.
	pub async fn register(
		&self,
		identity: &Identity,
	) -> Result<Option<TransactionHash>, ChainError> {
		info!(identity = %identity, "Registering indexer");
		match self.backend.register(identity).await {
			Ok(hash) => {
				info!(identity = %identity, tx_hash = %hash, "Indexer registered");
				Ok(Some(hash))
			}
			Err(ChainError::AlreadyRegistered) => {
				info!(identity = %identity, "Indexer already registered, continuing");
				Ok(None)
			}
			Err(e) => Err(e),
		}
	}

	/// Subscribes to submitted requests.
	///
	/// Every event is resolved through `get_request` before it is forwarded to
	/// `sink`. Events whose resolution fails are logged and dropped.
	pub async fn subscribe(&self, sink: mpsc::Sender<Request>) -> Result<(), ChainError> {
		let (event_tx, mut event_rx) = mpsc::channel::<RequestSubmitted>(sink.max_capacity());
		self.backend.start_monitoring(event_tx).await?;

		let backend = self.backend.clone();
		let handle = tokio::spawn(async move {
			while let Some(event) = event_rx.recv().await {
				let request = match backend.get_request(&event.request_id).await {
					Ok(request) => request,
					Err(e) => {
						warn!(
							request_id = %event.request_id,
							sender = %event.sender,
							"Dropping request, failed to read it back: {}",
							e
						);
						continue;
					}
				};

				info!(
					request_id = %request.request_id,
					required_type = %request.required_type,
					"Request submitted"
				);
				if sink.send(request).await.is_err() {
					break;
				}
			}
		});

		if let Some(previous) = self.forwarder.lock().await.replace(handle) {
			previous.abort();
		}
		Ok(())
	}

	/// Applies to `request_id` on-chain and returns the confirmed hash.
	pub async fn offer(
		&self,
		identity: &Identity,
		request_id: &RequestId,
	) -> Result<TransactionHash, ChainError> {
		self.backend.apply_to_request(identity, request_id).await
	}

	/// Detaches the subscription. Only the first call has an effect.
	pub async fn shutdown(&self) -> Result<(), ChainError> {
		if self.is_shut_down.swap(true, Ordering::SeqCst) {
			return Ok(());
		}

		info!("Detaching request subscription");
		self.backend.stop_monitoring().await?;
		if let Some(handle) = self.forwarder.lock().await.take() {
			handle.abort();
		}
		Ok(())
	}
}
