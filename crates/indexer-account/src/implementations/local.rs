//! Local private key wallet.

use crate::{AccountError, AccountInterface};
use alloy::network::EthereumWallet;
use alloy::primitives::{Address, Signature};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use async_trait::async_trait;
use tracing::warn;

const KEY_HEX_LEN: usize = 64;

/// Returns the key in canonical `0x` + 64 hex form.
///
/// Keys exported with one extra leading zero byte (`0x00` + 64 hex) are
/// corrected with a warning. Anything else that is not exactly 32 bytes of
/// `0x`-prefixed hex is rejected.
pub fn normalize_private_key(raw: &str) -> Result<String, AccountError> {
	let raw = raw.trim();
	let Some(body) = raw.strip_prefix("0x") else {
		return Err(AccountError::InvalidKey(
			"private key must start with 0x".to_string(),
		));
	};

	let body = if body.len() == KEY_HEX_LEN + 2 && body.starts_with("00") {
		warn!("Private key has an extra leading zero byte, stripping it");
		&body[2..]
	} else {
		body
	};

	if body.len() != KEY_HEX_LEN {
		return Err(AccountError::InvalidKey(format!(
			"private key must be 32 bytes (64 hex characters), got {} characters",
			body.len()
		)));
	}
	if hex::decode(body).is_err() {
		return Err(AccountError::InvalidKey(
			"private key must be valid hexadecimal".to_string(),
		));
	}

	Ok(format!("0x{}", body))
}

/// Local wallet implementation using Alloy's signer.
pub struct LocalWallet {
	signer: PrivateKeySigner,
}

impl LocalWallet {
	/// Creates a new LocalWallet from a hex-encoded private key.
	pub fn new(private_key_hex: &str) -> Result<Self, AccountError> {
		let key = normalize_private_key(private_key_hex)?;
		let signer = key
			.parse::<PrivateKeySigner>()
			.map_err(|e| AccountError::InvalidKey(format!("Invalid private key: {}", e)))?;

		Ok(Self { signer })
	}
}

#[async_trait]
impl AccountInterface for LocalWallet {
	fn address(&self) -> Address {
		self.signer.address()
	}

	fn wallet(&self) -> EthereumWallet {
		EthereumWallet::from(self.signer.clone())
	}

	async fn sign_message(&self, message: &[u8]) -> Result<Signature, AccountError> {
		self.signer
			.sign_message(message)
			.await
			.map_err(|e| AccountError::SigningFailed(format!("Failed to sign message: {}", e)))
	}
}
