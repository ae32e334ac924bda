//! Signing account for the indexer's outbound transactions.

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, Signature};
use async_trait::async_trait;
use thiserror::Error;

pub mod implementations {
	pub mod local;
}

pub use implementations::local::{normalize_private_key, LocalWallet};

#[derive(Debug, Error)]
pub enum AccountError {
	#[error("Signing failed: {0}")]
	SigningFailed(String),
	#[error("Invalid key: {0}")]
	InvalidKey(String),
}

#[async_trait]
pub trait AccountInterface: Send + Sync {
	/// Address transactions are sent from.
	fn address(&self) -> Address;

	/// Wallet handed to the chain provider for transaction signing.
	fn wallet(&self) -> EthereumWallet;

	async fn sign_message(&self, message: &[u8]) -> Result<Signature, AccountError>;
}

pub struct AccountService {
	provider: Box<dyn AccountInterface>,
}

impl AccountService {
	pub fn new(provider: Box<dyn AccountInterface>) -> Self {
		Self { provider }
	}

	/// Builds a service around a local key, normalizing it first.
	pub fn from_private_key(private_key: &str) -> Result<Self, AccountError> {
		Ok(Self::new(Box::new(LocalWallet::new(private_key)?)))
	}

	pub fn address(&self) -> Address {
		self.provider.address()
	}

	pub fn wallet(&self) -> EthereumWallet {
		self.provider.wallet()
	}

	pub async fn sign_message(&self, message: &[u8]) -> Result<Signature, AccountError> {
		self.provider.sign_message(message).await
	}
}
