//! Configuration types for the indexer.

use crate::serde_helpers::{deserialize_amount, serialize_amount};
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Complete indexer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexerConfig {
	/// Identity and worker pool settings
	pub indexer: IndexerSettings,
	/// Chain connection and contracts
	pub chain: ChainConfig,
	/// Catalog and offer persistence
	#[serde(default)]
	pub storage: StorageConfig,
	/// HTTP retrieval API
	#[serde(default)]
	pub api: ApiConfig,
}

/// Identity and pipeline settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexerSettings {
	/// Decentralized identifier used for `register` and `applyToRequest`
	pub identity: String,
	/// Maximum number of requests processed concurrently
	#[serde(default = "default_workers")]
	pub workers: usize,
	/// Capacity of the channel between the chain watcher and the workers
	#[serde(default = "default_queue_capacity")]
	pub queue_capacity: usize,
	/// How long shutdown waits for in-flight requests
	#[serde(default = "default_drain_timeout_secs")]
	pub drain_timeout_secs: u64,
}

/// Chain connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
	/// HTTP RPC endpoint
	pub rpc_url: String,
	/// Hex-encoded signing key
	pub private_key: String,
	/// Indexer registry contract
	pub registry_address: Address,
	/// Request gate contract
	pub gate_address: Address,
	/// Gas limit attached to outbound transactions
	#[serde(default = "default_gas_limit")]
	pub gas_limit: u64,
	/// Confirmations awaited after sending a transaction
	#[serde(default = "default_confirmations")]
	pub confirmations: u64,
	/// Event polling interval in seconds
	#[serde(default = "default_poll_interval_secs")]
	pub poll_interval_secs: u64,
	/// First block to scan for requests (latest if unset)
	#[serde(default)]
	pub start_block: Option<u64>,
	/// Stake token checked before registering
	#[serde(default)]
	pub stake: Option<StakeConfig>,
}

/// Stake token required by the registry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StakeConfig {
	/// ERC-20 token the registry pulls the stake from
	pub token_address: Address,
	/// Allowance the registry needs to register this indexer
	#[serde(
		deserialize_with = "deserialize_amount",
		serialize_with = "serialize_amount"
	)]
	pub required_amount: U256,
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
	#[default]
	Postgres,
	Memory,
}

/// Persistence settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Storage backend: "postgres" or "memory"
	#[serde(default)]
	pub backend: StorageBackend,
	/// Connection string for the postgres backend
	#[serde(default)]
	pub database_url: Option<String>,
	/// Connection pool size
	#[serde(default = "default_max_connections")]
	pub max_connections: u32,
	/// Apply embedded migrations at startup
	#[serde(default)]
	pub run_migrations: bool,
	/// JSON file of TDs loaded into the catalog at startup (memory backend
	/// only)
	#[serde(default)]
	pub seed_file: Option<String>,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			backend: StorageBackend::default(),
			database_url: None,
			max_connections: default_max_connections(),
			run_migrations: false,
			seed_file: None,
		}
	}
}

/// HTTP API settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	#[serde(default = "default_host")]
	pub host: String,
	#[serde(default = "default_port")]
	pub port: u16,
	/// Include internal error details in 5xx bodies
	#[serde(default)]
	pub debug_errors: bool,
}

impl Default for ApiConfig {
	fn default() -> Self {
		Self {
			host: default_host(),
			port: default_port(),
			debug_errors: false,
		}
	}
}

fn default_workers() -> usize {
	8
}

fn default_queue_capacity() -> usize {
	256
}

fn default_drain_timeout_secs() -> u64 {
	30
}

fn default_gas_limit() -> u64 {
	500_000
}

fn default_confirmations() -> u64 {
	1
}

fn default_poll_interval_secs() -> u64 {
	3
}

fn default_max_connections() -> u32 {
	5
}

fn default_host() -> String {
	"0.0.0.0".to_string()
}

fn default_port() -> u16 {
	3000
}
