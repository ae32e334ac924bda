use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indexer_account::AccountService;
use indexer_catalog::implementations::memory::MemoryCatalog;
use indexer_catalog::implementations::postgres::PostgresCatalog;
use indexer_catalog::CatalogService;
use indexer_chain::implementations::evm::alloy::AlloyChain;
use indexer_chain::ChainService;
use indexer_config::{ConfigLoader, IndexerConfig, StorageBackend, StorageConfig};
use indexer_core::IndexerBuilder;
use indexer_storage::implementations::memory::MemoryStorage;
use indexer_storage::implementations::postgres::PostgresStorage;
use indexer_storage::StorageInterface;
use indexer_types::IndexerEvent;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod server;

#[derive(Parser)]
#[command(name = "td-indexer")]
#[command(about = "Thing Description indexer", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	#[arg(short, long, value_name = "FILE", default_value = "config/indexer.toml")]
	config: PathBuf,

	#[arg(long, env = "INDEXER_LOG_LEVEL", default_value = "info")]
	log_level: String,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the indexer
	Start,
	/// Validate the configuration file
	Validate,
	/// Apply the database schema migrations
	Migrate,
	/// Load Thing Descriptions from a JSON file into the catalog
	LoadTds {
		/// A JSON array of TD documents, or a single document
		#[arg(short, long, value_name = "FILE")]
		file: PathBuf,
	},
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	setup_tracing(&cli.log_level);

	match &cli.command {
		Some(Commands::Start) | None => start_service(&cli.config).await,
		Some(Commands::Validate) => validate_config(&cli.config).await,
		Some(Commands::Migrate) => migrate(&cli.config).await,
		Some(Commands::LoadTds { file }) => load_tds(&cli.config, file).await,
	}
}

async fn load_config(path: &Path) -> Result<IndexerConfig> {
	info!("Loading configuration from: {:?}", path);
	ConfigLoader::new()
		.with_file(path)
		.load()
		.await
		.context("Failed to load configuration")
}

async fn start_service(config_path: &Path) -> Result<()> {
	info!("Starting TD indexer");
	let config = load_config(config_path).await?;

	let account = AccountService::from_private_key(&config.chain.private_key)
		.context("Failed to load signing key")?;
	info!(address = %account.address(), "Loaded indexer account");

	let chain = AlloyChain::new(&config.chain, &account)
		.await
		.context("Failed to connect to chain")?;
	let (storage, catalog) = connect_backends(&config.storage).await?;

	let engine = IndexerBuilder::new(config.indexer.clone())
		.with_chain(ChainService::new(Arc::new(chain)))
		.with_catalog(catalog)
		.with_storage(storage)
		.build()
		.context("Failed to build indexer")?;
	let engine = Arc::new(engine);

	match engine.register().await.context("Failed to register indexer")? {
		Some(hash) => info!(tx_hash = %hash, "Indexer registered"),
		None => info!(identity = %engine.identity(), "Indexer already registered"),
	}

	let state = server::AppState::new(engine.retrieval(), config.api.debug_errors);
	let bind_address = format!("{}:{}", config.api.host, config.api.port);
	let listener = tokio::net::TcpListener::bind(&bind_address)
		.await
		.with_context(|| format!("Failed to bind {}", bind_address))?;
	info!("HTTP API listening on {}", bind_address);

	let http_handle =
		tokio::spawn(async move { axum::serve(listener, server::build_router(state)).await });

	let event_handle = spawn_event_logger(engine.event_bus().subscribe());

	let mut runner = tokio::spawn({
		let engine = engine.clone();
		async move { engine.run().await }
	});

	info!("TD indexer started successfully");

	let finished_early = tokio::select! {
		_ = shutdown_signal() => {
			info!("Shutdown signal received, stopping indexer...");
			None
		}
		result = &mut runner => Some(result),
	};

	engine.shutdown();
	let result = match finished_early {
		Some(result) => result,
		None => runner.await,
	};

	http_handle.abort();
	event_handle.abort();
	engine.close().await;

	result
		.context("Indexer task panicked")?
		.context("Indexer stopped with an error")?;

	info!("TD indexer stopped");
	Ok(())
}

/// Traces every pipeline event at debug level.
fn spawn_event_logger(
	mut events: broadcast::Receiver<IndexerEvent>,
) -> tokio::task::JoinHandle<()> {
	tokio::spawn(async move {
		loop {
			match events.recv().await {
				Ok(event) => debug!(?event, "Indexer event"),
				Err(broadcast::error::RecvError::Lagged(missed)) => {
					warn!(missed, "Event logger fell behind")
				}
				Err(broadcast::error::RecvError::Closed) => break,
			}
		}
	})
}

/// Opens the durable store and the catalog for the configured backend.
async fn connect_backends(
	config: &StorageConfig,
) -> Result<(Arc<dyn StorageInterface>, CatalogService)> {
	match config.backend {
		StorageBackend::Postgres => {
			let storage = connect_postgres(config).await?;
			if config.run_migrations {
				storage
					.run_migrations()
					.await
					.context("Failed to run migrations")?;
			}
			let catalog = CatalogService::new(Arc::new(PostgresCatalog::new(storage.pool().clone())));
			Ok((Arc::new(storage), catalog))
		}
		StorageBackend::Memory => {
			warn!("Using in-memory storage; offers and the catalog are lost on restart");
			let catalog = CatalogService::new(Arc::new(MemoryCatalog::new()));
			match &config.seed_file {
				Some(seed_file) => {
					let seed_file = Path::new(seed_file);
					let documents = read_documents(seed_file).await?;
					ingest_documents(&catalog, &documents, seed_file)
						.await
						.context("Failed to seed the catalog")?;
				}
				None => warn!("No storage.seed_file configured, the catalog is empty"),
			}
			Ok((Arc::new(MemoryStorage::new()), catalog))
		}
	}
}

async fn connect_postgres(config: &StorageConfig) -> Result<PostgresStorage> {
	let url = match (&config.backend, config.database_url.as_deref()) {
		(StorageBackend::Postgres, Some(url)) => url,
		(StorageBackend::Postgres, None) => bail!("storage.database_url is not set"),
		(StorageBackend::Memory, _) => bail!("this command requires the postgres storage backend"),
	};
	PostgresStorage::connect(url, config.max_connections)
		.await
		.context("Failed to connect to the database")
}

async fn validate_config(config_path: &Path) -> Result<()> {
	let config = load_config(config_path).await?;

	info!("Configuration is valid");
	info!("Identity: {}", config.indexer.identity);
	info!(
		"Workers: {} (queue capacity {})",
		config.indexer.workers, config.indexer.queue_capacity
	);
	info!("Registry: {}", config.chain.registry_address);
	info!("Request gate: {}", config.chain.gate_address);
	if let Some(stake) = &config.chain.stake {
		info!(
			"Stake: {} of token {}",
			stake.required_amount, stake.token_address
		);
	}
	info!("Storage backend: {:?}", config.storage.backend);
	info!("HTTP API: {}:{}", config.api.host, config.api.port);

	Ok(())
}

async fn migrate(config_path: &Path) -> Result<()> {
	let config = load_config(config_path).await?;
	let storage = connect_postgres(&config.storage).await?;

	let result = storage.run_migrations().await;
	storage.close().await;
	result.context("Failed to run migrations")?;

	info!("Migrations applied");
	Ok(())
}

async fn load_tds(config_path: &Path, file: &Path) -> Result<()> {
	let config = load_config(config_path).await?;
	let documents = read_documents(file).await?;

	let storage = connect_postgres(&config.storage).await?;
	let catalog = CatalogService::new(Arc::new(PostgresCatalog::new(storage.pool().clone())));
	let result = ingest_documents(&catalog, &documents, file).await;
	storage.close().await;

	result
}

/// Reads a JSON array of TD documents, or a single document.
async fn read_documents(file: &Path) -> Result<Vec<Value>> {
	let contents = tokio::fs::read_to_string(file)
		.await
		.with_context(|| format!("Failed to read {:?}", file))?;
	let documents = match serde_json::from_str::<Value>(&contents)
		.with_context(|| format!("Failed to parse {:?} as JSON", file))?
	{
		Value::Array(documents) => documents,
		document => vec![document],
	};
	Ok(documents)
}

/// Ingests every document, skipping invalid ones. Fails only when nothing
/// could be loaded from a non-empty file.
async fn ingest_documents(catalog: &CatalogService, documents: &[Value], file: &Path) -> Result<()> {
	let mut loaded = 0usize;
	let mut skipped = 0usize;
	for (index, document) in documents.iter().enumerate() {
		match catalog.ingest(document).await {
			Ok(id) => {
				loaded += 1;
				info!(td_id = %id, "Loaded TD #{}", index);
			}
			Err(e) => {
				skipped += 1;
				warn!("Skipping TD #{}: {}", index, e);
			}
		}
	}

	info!(loaded, skipped, "Catalog load finished");
	if loaded == 0 && skipped > 0 {
		bail!("no TD in {:?} could be loaded", file);
	}
	Ok(())
}

fn setup_tracing(log_level: &str) {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer())
		.init();
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = signal::ctrl_c().await {
			error!("Failed to install Ctrl+C handler: {}", e);
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut sigterm) => {
				sigterm.recv().await;
			}
			Err(e) => {
				error!("Failed to install SIGTERM handler: {}", e);
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	fn memory_config(seed_file: Option<&Path>) -> StorageConfig {
		StorageConfig {
			backend: StorageBackend::Memory,
			seed_file: seed_file.map(|p| p.display().to_string()),
			..StorageConfig::default()
		}
	}

	#[tokio::test]
	async fn test_memory_backend_is_seeded_from_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(
			file,
			r#"[{{"@type": "Sensor", "title": "gauge"}}, {{"title": "no type"}}, {{"@type": ["Actuator", "Sensor"]}}]"#
		)
		.unwrap();

		let (storage, catalog) = connect_backends(&memory_config(Some(file.path())))
			.await
			.unwrap();

		let sensors = catalog.find_compatible("Sensor").await;
		assert_eq!(sensors.len(), 2);
		assert_eq!(catalog.find_compatible("Actuator").await.len(), 1);
		assert!(storage.health_check().await.is_ok());
	}

	#[tokio::test]
	async fn test_unusable_seed_file_fails_startup() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, r#"[{{"title": "no type"}}]"#).unwrap();
		assert!(connect_backends(&memory_config(Some(file.path()))).await.is_err());

		let missing = Path::new("/nonexistent/tds.json");
		assert!(connect_backends(&memory_config(Some(missing))).await.is_err());
	}

	#[tokio::test]
	async fn test_memory_backend_without_seed_starts_empty() {
		let (_, catalog) = connect_backends(&memory_config(None)).await.unwrap();
		assert!(catalog.find_compatible("Sensor").await.is_empty());
	}

	#[test]
	fn test_cli_parses_load_tds() {
		let cli = Cli::try_parse_from(["td-indexer", "load-tds", "--file", "tds.json"]).unwrap();
		assert!(matches!(
			cli.command,
			Some(Commands::LoadTds { ref file }) if file == Path::new("tds.json")
		));
	}
}
