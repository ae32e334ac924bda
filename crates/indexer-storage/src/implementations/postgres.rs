//! Postgres durable layer over `td_matches`, `td_store` and `on_chain_log`.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use indexer_types::{OnChainLogEntry, RequestId, TdId, ThingDescription};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PostgresStorage {
	pool: PgPool,
}

impl PostgresStorage {
	/// Opens a connection pool to `database_url`.
	pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
		info!("Connecting to database");

		let pool = PgPoolOptions::new()
			.max_connections(max_connections)
			.acquire_timeout(Duration::from_secs(5))
			.connect(database_url)
			.await?;

		info!("Database connection established");
		Ok(Self { pool })
	}

	/// Shared with the catalog, which lives in the same database.
	pub fn pool(&self) -> &PgPool {
		&self.pool
	}

	/// Applies the embedded schema migrations.
	pub async fn run_migrations(&self) -> Result<(), StorageError> {
		info!("Running database migrations");

		sqlx::migrate!("./migrations")
			.run(&self.pool)
			.await
			.map_err(|e| StorageError::Migration(e.to_string()))?;

		info!("Migrations completed successfully");
		Ok(())
	}
}

#[async_trait]
impl StorageInterface for PostgresStorage {
	async fn insert_matches(
		&self,
		request_id: &RequestId,
		tds: &[ThingDescription],
	) -> Result<u64, StorageError> {
		let ids: Vec<i64> = tds.iter().map(|td| td.id.0).collect();

		let result = sqlx::query(
			r#"
			INSERT INTO td_matches (request_id, td_id, matched_at)
			SELECT $1, unnest($2::bigint[]), NOW()
			ON CONFLICT (request_id, td_id) DO NOTHING
			"#,
		)
		.bind(request_id.as_str())
		.bind(&ids)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected())
	}

	async fn find_tds_by_request(
		&self,
		request_id: &RequestId,
	) -> Result<Vec<ThingDescription>, StorageError> {
		let rows: Vec<(i64, Json<Value>)> = sqlx::query_as(
			r#"
			SELECT s.id, s.td
			FROM td_matches m
			JOIN td_store s ON s.id = m.td_id
			WHERE m.request_id = $1
			ORDER BY m.matched_at, m.id
			"#,
		)
		.bind(request_id.as_str())
		.fetch_all(&self.pool)
		.await?;

		Ok(rows
			.into_iter()
			.filter_map(|(id, Json(document))| {
				ThingDescription::from_document(TdId(id), document)
					.map_err(|e| warn!(td_id = id, "Skipping stored TD: {}", e))
					.ok()
			})
			.collect())
	}

	async fn log_action(&self, entry: &OnChainLogEntry) -> Result<(), StorageError> {
		sqlx::query(
			r#"
			INSERT INTO on_chain_log (request_id, action, tx_hash, created_at)
			VALUES ($1, $2, $3, $4)
			"#,
		)
		.bind(&entry.request_id)
		.bind(entry.action.as_str())
		.bind(entry.tx_hash.as_ref().map(|hash| hash.to_string()))
		.bind(entry.created_at)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	async fn health_check(&self) -> Result<(), StorageError> {
		sqlx::query("SELECT 1").execute(&self.pool).await?;
		Ok(())
	}

	async fn close(&self) {
		info!("Closing database connection");
		self.pool.close().await;
	}
}
