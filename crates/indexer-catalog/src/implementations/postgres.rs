//! Postgres catalog over the `td_store` table.

use crate::{CatalogError, CatalogInterface};
use async_trait::async_trait;
use indexer_types::TdId;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;

/// `@type` stored as a scalar string or as an array containing the type.
const FIND_BY_TYPE: &str = r#"
	SELECT id FROM td_store
	WHERE td->>'@type' = $1
	   OR (jsonb_typeof(td->'@type') = 'array' AND td->'@type' @> $2::jsonb)
	ORDER BY id
"#;

#[derive(Debug, Clone)]
pub struct PostgresCatalog {
	pool: PgPool,
}

impl PostgresCatalog {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl CatalogInterface for PostgresCatalog {
	async fn find_td_ids_by_type(&self, required_type: &str) -> Result<Vec<TdId>, CatalogError> {
		let ids: Vec<i64> = sqlx::query_scalar(FIND_BY_TYPE)
			.bind(required_type)
			.bind(Json(vec![required_type]))
			.fetch_all(&self.pool)
			.await?;
		Ok(ids.into_iter().map(TdId).collect())
	}

	async fn get_td(&self, id: TdId) -> Result<Option<Value>, CatalogError> {
		let document: Option<Json<Value>> =
			sqlx::query_scalar("SELECT td FROM td_store WHERE id = $1")
				.bind(id.0)
				.fetch_optional(&self.pool)
				.await?;
		Ok(document.map(|Json(value)| value))
	}

	async fn insert_td(&self, document: &Value) -> Result<TdId, CatalogError> {
		let id: i64 = sqlx::query_scalar("INSERT INTO td_store (td) VALUES ($1) RETURNING id")
			.bind(Json(document))
			.fetch_one(&self.pool)
			.await?;
		Ok(TdId(id))
	}
}
