//! Alloy backend for the registry and request gate contracts.
//!
//! Requests are discovered by polling `eth_getLogs` for `RequestSubmitted`
//! on a fixed interval. Outbound calls are simulated with `eth_call` first so
//! that contract reverts carry their data and can be classified, then sent
//! with the configured gas limit and awaited for the configured confirmations.

use crate::{ChainError, ChainInterface};
use alloy::network::Ethereum;
use alloy::primitives::{Address, B256};
use alloy::providers::{DynProvider, PendingTransactionBuilder, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use alloy::sol;
use alloy::sol_types::{decode_revert_reason, Revert, SolError, SolEvent};
use alloy::transports::RpcError;
use async_trait::async_trait;
use indexer_account::AccountService;
use indexer_config::{ChainConfig, StakeConfig};
use indexer_types::{Identity, Request, RequestId, RequestSubmitted, TransactionHash};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

sol! {
	#[sol(rpc)]
	contract IndexerRegistry {
		error AlreadyRegistered();

		function register(string did) external;
	}

	#[sol(rpc)]
	contract RequestGate {
		event RequestSubmitted(bytes32 indexed requestId, address indexed sender);

		function getRequest(bytes32 requestId) external view returns (string query, address requester, uint256 submittedAt);
		function applyToRequest(string did, bytes32 requestId) external;
	}

	#[sol(rpc)]
	interface IERC20 {
		error ERC20InsufficientAllowance(address spender, uint256 allowance, uint256 needed);

		function allowance(address owner, address spender) external view returns (uint256);
	}
}

/// Alloy-based chain backend.
pub struct AlloyChain {
	provider: DynProvider,
	registry: IndexerRegistry::IndexerRegistryInstance<DynProvider>,
	gate: RequestGate::RequestGateInstance<DynProvider>,
	signer_address: Address,
	stake: Option<StakeConfig>,
	gas_limit: u64,
	confirmations: u64,
	poll_interval: Duration,
	/// Last block scanned for requests.
	last_block: Arc<Mutex<u64>>,
	is_monitoring: Arc<AtomicBool>,
	stop_signal: Arc<Mutex<Option<mpsc::Sender<()>>>>,
}

impl AlloyChain {
	/// Connects to the RPC endpoint and binds both contracts.
	///
	/// Scanning starts at `start_block` when configured, otherwise after the
	/// block that is current at construction time.
	pub async fn new(config: &ChainConfig, account: &AccountService) -> Result<Self, ChainError> {
		let url = config
			.rpc_url
			.parse()
			.map_err(|e| ChainError::Connection(format!("Invalid RPC URL: {}", e)))?;

		let provider = ProviderBuilder::new()
			.wallet(account.wallet())
			.connect_http(url)
			.erased();

		let last_block = match config.start_block {
			Some(start) => start.saturating_sub(1),
			None => provider.get_block_number().await.map_err(|e| {
				ChainError::Connection(format!("Failed to get block number: {}", e))
			})?,
		};

		info!(
			registry = %config.registry_address,
			gate = %config.gate_address,
			sender = %account.address(),
			from_block = last_block + 1,
			"Connected to chain"
		);

		Ok(Self {
			registry: IndexerRegistry::new(config.registry_address, provider.clone()),
			gate: RequestGate::new(config.gate_address, provider.clone()),
			provider,
			signer_address: account.address(),
			stake: config.stake.clone(),
			gas_limit: config.gas_limit,
			confirmations: config.confirmations.max(1),
			poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
			last_block: Arc::new(Mutex::new(last_block)),
			is_monitoring: Arc::new(AtomicBool::new(false)),
			stop_signal: Arc::new(Mutex::new(None)),
		})
	}

	/// Waits for the configured confirmations and checks the receipt status.
	async fn confirm(
		&self,
		pending: PendingTransactionBuilder<Ethereum>,
	) -> Result<TransactionHash, ChainError> {
		let submitted = TransactionHash(pending.tx_hash().to_vec());
		info!(tx_hash = %submitted.truncated(), "Submitted transaction");

		let receipt = pending
			.with_required_confirmations(self.confirmations)
			.get_receipt()
			.await
			.map_err(|e| ChainError::Provider(format!("Failed to get receipt: {}", e)))?;

		let hash = TransactionHash(receipt.transaction_hash.to_vec());
		if !receipt.status() {
			return Err(ChainError::Reverted(format!(
				"transaction {} reverted in block {}",
				hash,
				receipt.block_number.unwrap_or_default()
			)));
		}

		debug!(
			tx_hash = %hash.truncated(),
			block = receipt.block_number.unwrap_or_default(),
			gas_used = receipt.gas_used,
			"Transaction confirmed"
		);
		Ok(hash)
	}

	/// Explains a failed registration with the stake allowance when one is
	/// configured and the current allowance is below it.
	async fn diagnose_stake(&self, original: ChainError) -> ChainError {
		let Some(stake) = &self.stake else {
			return original;
		};

		let token = IERC20::new(stake.token_address, self.provider.clone());
		let spender = *self.registry.address();
		match token.allowance(self.signer_address, spender).call().await {
			Ok(current) if current < stake.required_amount => ChainError::InsufficientAllowance {
				spender: spender.to_string(),
				current: current.to_string(),
				required: stake.required_amount.to_string(),
			},
			Ok(_) => original,
			Err(e) => {
				warn!("Failed to read stake allowance: {}", e);
				original
			}
		}
	}

	/// Main monitoring loop for submitted requests.
	async fn monitoring_loop(
		provider: DynProvider,
		gate: Address,
		last_block: Arc<Mutex<u64>>,
		poll_interval: Duration,
		sender: mpsc::Sender<RequestSubmitted>,
		mut stop_rx: mpsc::Receiver<()>,
	) {
		let mut interval = tokio::time::interval(poll_interval);

		loop {
			tokio::select! {
				_ = interval.tick() => {
					let mut last_block_num = last_block.lock().await;

					let current_block = match provider.get_block_number().await {
						Ok(block) => block,
						Err(e) => {
							error!("Failed to get block number: {}", e);
							continue;
						}
					};

					if current_block <= *last_block_num {
						continue;
					}

					let filter = Filter::new()
						.address(gate)
						.event_signature(RequestGate::RequestSubmitted::SIGNATURE_HASH)
						.from_block(*last_block_num + 1)
						.to_block(current_block);

					let logs = match provider.get_logs(&filter).await {
						Ok(logs) => logs,
						Err(e) => {
							warn!("Failed to get logs: {}", e);
							continue;
						}
					};

					for log in logs {
						match decode_request_submitted(&log) {
							Ok(event) => {
								if sender.send(event).await.is_err() {
									return;
								}
							}
							Err(e) => warn!("Skipping undecodable log: {}", e),
						}
					}

					*last_block_num = current_block;
				}
				_ = stop_rx.recv() => {
					break;
				}
			}
		}
	}
}

#[async_trait]
impl ChainInterface for AlloyChain {
	async fn register(&self, identity: &Identity) -> Result<TransactionHash, ChainError> {
		let call = self.registry.register(identity.to_string()).gas(self.gas_limit);

		if let Err(e) = call.call().await {
			return Err(match map_contract_error(e) {
				ChainError::AlreadyRegistered => ChainError::AlreadyRegistered,
				other => self.diagnose_stake(other).await,
			});
		}

		let pending = call.send().await.map_err(map_contract_error)?;
		self.confirm(pending).await
	}

	async fn get_request(&self, request_id: &RequestId) -> Result<Request, ChainError> {
		let id = parse_request_id(request_id)?;
		let request = self
			.gate
			.getRequest(id)
			.call()
			.await
			.map_err(map_contract_error)?;

		if request.submittedAt.is_zero() && request.query.is_empty() {
			return Err(ChainError::InvalidRequest(format!(
				"request {} is unknown to the gate",
				request_id
			)));
		}

		debug!(
			request_id = %request_id,
			requester = %request.requester,
			"Resolved request"
		);
		Ok(Request::new(request_id.clone(), request.query))
	}

	async fn apply_to_request(
		&self,
		identity: &Identity,
		request_id: &RequestId,
	) -> Result<TransactionHash, ChainError> {
		let id = parse_request_id(request_id)?;
		let call = self
			.gate
			.applyToRequest(identity.to_string(), id)
			.gas(self.gas_limit);

		call.call().await.map_err(map_contract_error)?;
		let pending = call.send().await.map_err(map_contract_error)?;
		self.confirm(pending).await
	}

	async fn start_monitoring(
		&self,
		sender: mpsc::Sender<RequestSubmitted>,
	) -> Result<(), ChainError> {
		if self.is_monitoring.load(Ordering::SeqCst) {
			return Err(ChainError::AlreadyMonitoring);
		}

		let (stop_tx, stop_rx) = mpsc::channel(1);
		*self.stop_signal.lock().await = Some(stop_tx);

		let provider = self.provider.clone();
		let gate = *self.gate.address();
		let last_block = self.last_block.clone();
		let poll_interval = self.poll_interval;

		tokio::spawn(async move {
			Self::monitoring_loop(provider, gate, last_block, poll_interval, sender, stop_rx).await;
		});

		self.is_monitoring.store(true, Ordering::SeqCst);
		Ok(())
	}

	async fn stop_monitoring(&self) -> Result<(), ChainError> {
		if !self.is_monitoring.load(Ordering::SeqCst) {
			return Ok(());
		}

		if let Some(stop_tx) = self.stop_signal.lock().await.take() {
			let _ = stop_tx.try_send(());
		}

		self.is_monitoring.store(false, Ordering::SeqCst);
		Ok(())
	}
}

/// Parses the off-chain request id back into the contract's `bytes32`.
fn parse_request_id(request_id: &RequestId) -> Result<B256, ChainError> {
	request_id.as_str().parse::<B256>().map_err(|_| {
		ChainError::InvalidRequest(format!("{} is not a bytes32 request id", request_id))
	})
}

fn format_request_id(id: B256) -> RequestId {
	RequestId::new(format!("0x{}", hex::encode(id)))
}

fn decode_request_submitted(log: &Log) -> Result<RequestSubmitted, ChainError> {
	let decoded = log
		.log_decode::<RequestGate::RequestSubmitted>()
		.map_err(|e| ChainError::Provider(format!("Failed to decode event: {}", e)))?;
	let event = decoded.inner.data;

	Ok(RequestSubmitted {
		request_id: format_request_id(event.requestId),
		sender: event.sender.to_string(),
		block_number: log.block_number,
	})
}

/// Maps revert data from the registry, the gate or the stake token.
fn classify_revert(data: &[u8]) -> Option<ChainError> {
	if IndexerRegistry::AlreadyRegistered::abi_decode(data).is_ok() {
		return Some(ChainError::AlreadyRegistered);
	}
	if let Ok(e) = IERC20::ERC20InsufficientAllowance::abi_decode(data) {
		return Some(ChainError::InsufficientAllowance {
			spender: e.spender.to_string(),
			current: e.allowance.to_string(),
			required: e.needed.to_string(),
		});
	}
	if let Ok(revert) = Revert::abi_decode(data) {
		return Some(classify_reason(revert.reason));
	}
	decode_revert_reason(data).map(classify_reason)
}

fn classify_reason(reason: String) -> ChainError {
	if reason.to_lowercase().contains("already registered") {
		ChainError::AlreadyRegistered
	} else {
		ChainError::Reverted(reason)
	}
}

fn map_contract_error(err: alloy::contract::Error) -> ChainError {
	if let Some(classified) = err.as_revert_data().and_then(|data| classify_revert(&data)) {
		return classified;
	}

	if let alloy::contract::Error::TransportError(RpcError::Transport(e)) = &err {
		return ChainError::Connection(e.to_string());
	}

	let message = err.to_string();
	if message.to_lowercase().contains("already registered") {
		return ChainError::AlreadyRegistered;
	}
	ChainError::Provider(message)
}
