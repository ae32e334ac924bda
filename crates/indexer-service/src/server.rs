//! HTTP API over the offer store.
//!
//! `GET /data/{requestId}` returns the TDs offered for a request from both
//! store layers. `GET /response/{requestId}` returns the bare documents the
//! durable layer holds. `/health` reports whether the durable store answers.

use axum::{
	extract::{Path, State},
	http::StatusCode,
	response::{IntoResponse, Json, Response},
	routing::get,
	Router,
};
use indexer_core::{RetrievalError, RetrievalService};
use indexer_types::{
	DataResponse, ErrorResponse, MatchesResponse, MessageResponse, NO_DATA_MESSAGE,
	NO_MATCHES_MESSAGE,
};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, warn};

const BANNER: &str = "td-indexer\n\nGET /data/{requestId}      TDs offered for a request\nGET /response/{requestId}  durable matches of a request\nGET /health                store health\n";

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	retrieval: RetrievalService,
	/// Expose internal error detail in 5xx bodies.
	debug_errors: bool,
}

impl AppState {
	pub fn new(retrieval: RetrievalService, debug_errors: bool) -> Self {
		Self {
			retrieval,
			debug_errors,
		}
	}

	fn internal(&self, status: StatusCode, message: &str, detail: String) -> ApiError {
		let mut body = ErrorResponse::new(message);
		if self.debug_errors {
			body = body.with_details(detail);
		}
		(status, Json(body))
	}
}

pub fn build_router(state: AppState) -> Router {
	Router::new()
		.route("/", get(banner))
		.route("/health", get(health))
		.route("/data/{request_id}", get(get_data))
		.route("/response/{request_id}", get(get_response))
		.with_state(state)
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive())
}

async fn banner() -> &'static str {
	BANNER
}

async fn health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
	match state.retrieval.health().await {
		Ok(()) => Ok(Json(json!({ "status": "ok" }))),
		Err(e) => {
			warn!("Health check failed: {}", e);
			Err(state.internal(
				StatusCode::SERVICE_UNAVAILABLE,
				"storage unavailable",
				e.to_string(),
			))
		}
	}
}

async fn get_data(
	State(state): State<AppState>,
	Path(request_id): Path<String>,
) -> Result<Json<DataResponse>, ApiError> {
	match state.retrieval.get(&request_id).await {
		Ok(response) => Ok(Json(response)),
		Err(RetrievalError::NotFound) => Err((
			StatusCode::NOT_FOUND,
			Json(ErrorResponse::new(NO_DATA_MESSAGE)),
		)),
		Err(e @ RetrievalError::InvalidRequest(_)) => Err((
			StatusCode::BAD_REQUEST,
			Json(ErrorResponse::new(e.to_string())),
		)),
		Err(RetrievalError::Storage(e)) => {
			error!(request_id = %request_id, "Failed to read offers: {}", e);
			Err(state.internal(
				StatusCode::INTERNAL_SERVER_ERROR,
				"internal server error",
				e.to_string(),
			))
		}
	}
}

async fn get_response(
	State(state): State<AppState>,
	Path(request_id): Path<String>,
) -> Result<Json<MatchesResponse>, Response> {
	match state.retrieval.durable_matches(&request_id).await {
		Ok(response) => Ok(Json(response)),
		Err(RetrievalError::NotFound) => Err((
			StatusCode::NOT_FOUND,
			Json(MessageResponse::new(NO_MATCHES_MESSAGE)),
		)
			.into_response()),
		Err(e @ RetrievalError::InvalidRequest(_)) => Err((
			StatusCode::BAD_REQUEST,
			Json(ErrorResponse::new(e.to_string())),
		)
			.into_response()),
		Err(RetrievalError::Storage(e)) => {
			error!(request_id = %request_id, "Failed to read durable matches: {}", e);
			Err(state
				.internal(
					StatusCode::INTERNAL_SERVER_ERROR,
					"internal server error",
					e.to_string(),
				)
				.into_response())
		}
	}
}
