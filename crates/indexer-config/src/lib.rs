//! Configuration loading for the TD indexer.
//!
//! Configuration is read from a TOML (or JSON) file. `${VAR}` placeholders are
//! substituted from the environment before parsing, a small set of
//! `INDEXER_*` variables override file values afterwards, and the result is
//! validated before it is handed to the service.

mod serde_helpers;
pub mod types;

pub use types::*;

use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("File not found: {0}")]
	FileNotFound(String),

	#[error("Parse error: {0}")]
	ParseError(String),

	#[error("Validation error: {0}")]
	ValidationError(String),

	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}

/// Configuration loader with environment variable substitution
pub struct ConfigLoader {
	file_path: Option<String>,
	env_prefix: String,
}

impl Default for ConfigLoader {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			file_path: None,
			env_prefix: "INDEXER_".to_string(),
		}
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_string_lossy().to_string());
		self
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	pub async fn load(&self) -> Result<IndexerConfig, ConfigError> {
		let Some(file_path) = &self.file_path else {
			return Err(ConfigError::FileNotFound(
				"No configuration file specified".to_string(),
			));
		};

		info!("Loading configuration from {}", file_path);
		let mut config = self.load_from_file(file_path).await?;

		self.apply_env_overrides(&mut config, |name| env::var(name).ok())?;
		validate_config(&config)?;

		Ok(config)
	}

	async fn load_from_file(&self, file_path: &str) -> Result<IndexerConfig, ConfigError> {
		if !Path::new(file_path).exists() {
			return Err(ConfigError::FileNotFound(file_path.to_string()));
		}
		let content = tokio::fs::read_to_string(file_path).await?;
		let substituted = substitute_env_vars(&content, |name| env::var(name).ok())?;

		match Path::new(file_path).extension().and_then(|s| s.to_str()) {
			Some("json") => from_json(&substituted),
			_ => from_toml(&substituted),
		}
	}

	/// Applies `<prefix>HTTP_PORT`, `<prefix>DATABASE_URL` and
	/// `<prefix>GAS_LIMIT` on top of the file values.
	fn apply_env_overrides<F>(&self, config: &mut IndexerConfig, lookup: F) -> Result<(), ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(port) = lookup(&format!("{}HTTP_PORT", self.env_prefix)) {
			debug!("Overriding HTTP port from environment");
			config.api.port = port
				.parse()
				.map_err(|e| ConfigError::ValidationError(format!("Invalid HTTP port: {}", e)))?;
		}

		if let Some(url) = lookup(&format!("{}DATABASE_URL", self.env_prefix)) {
			debug!("Overriding database URL from environment");
			config.storage.database_url = Some(url);
		}

		if let Some(gas_limit) = lookup(&format!("{}GAS_LIMIT", self.env_prefix)) {
			debug!("Overriding gas limit from environment");
			config.chain.gas_limit = gas_limit
				.parse()
				.map_err(|e| ConfigError::ValidationError(format!("Invalid gas limit: {}", e)))?;
		}

		Ok(())
	}
}

/// Parses a TOML document without validating it.
pub fn from_toml(contents: &str) -> Result<IndexerConfig, ConfigError> {
	toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Parses a JSON document without validating it.
pub fn from_json(contents: &str) -> Result<IndexerConfig, ConfigError> {
	serde_json::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Replaces every `${VAR_NAME}` with the value returned by `lookup`.
fn substitute_env_vars<F>(content: &str, lookup: F) -> Result<String, ConfigError>
where
	F: Fn(&str) -> Option<String>,
{
	let re = regex::Regex::new(r"\$\{([^}]+)\}")
		.map_err(|e| ConfigError::ParseError(e.to_string()))?;
	let mut result = content.to_string();

	for cap in re.captures_iter(content) {
		let full_match = &cap[0];
		let var_name = &cap[1];

		let value =
			lookup(var_name).ok_or_else(|| ConfigError::EnvVarNotFound(var_name.to_string()))?;
		result = result.replace(full_match, &value);
	}

	Ok(result)
}

/// Checks cross-field constraints serde cannot express.
pub fn validate_config(config: &IndexerConfig) -> Result<(), ConfigError> {
	let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

	if config.indexer.identity.trim().is_empty() {
		return invalid("indexer.identity must not be empty");
	}
	if config.indexer.workers == 0 {
		return invalid("indexer.workers must be at least 1");
	}
	if config.indexer.queue_capacity == 0 {
		return invalid("indexer.queue_capacity must be at least 1");
	}
	if config.chain.rpc_url.trim().is_empty() {
		return invalid("chain.rpc_url must not be empty");
	}
	if config.chain.private_key.trim().is_empty() {
		return invalid("chain.private_key must not be empty");
	}
	if config.chain.confirmations == 0 {
		return invalid("chain.confirmations must be at least 1");
	}
	if config.chain.poll_interval_secs == 0 {
		return invalid("chain.poll_interval_secs must be at least 1");
	}
	if config.storage.backend == StorageBackend::Postgres
		&& config
			.storage
			.database_url
			.as_deref()
			.is_none_or(|url| url.trim().is_empty())
	{
		return invalid("storage.database_url is required for the postgres backend");
	}
	if config.storage.backend == StorageBackend::Postgres && config.storage.seed_file.is_some() {
		return invalid("storage.seed_file is only supported by the memory backend, use load-tds");
	}

	Ok(())
}
