//! Offer types: the association between a request and the TDs proposed for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Identity, RequestId, TdId, ThingDescription, TransactionHash};

/// An offer made by this indexer for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
	pub request_id: RequestId,
	pub identity: Identity,
	pub td_ids: Vec<TdId>,
	pub created_at: DateTime<Utc>,
}

/// Memory-layer record: the request together with the hydrated TDs offered.
#[derive(Debug, Clone)]
pub struct OfferEntry {
	pub request_id: RequestId,
	pub tds: Vec<ThingDescription>,
	pub created_at: DateTime<Utc>,
}

impl OfferEntry {
	pub fn new(request_id: RequestId, tds: Vec<ThingDescription>) -> Self {
		Self {
			request_id,
			tds,
			created_at: Utc::now(),
		}
	}

	pub fn to_offer(&self, identity: &Identity) -> Offer {
		Offer {
			request_id: self.request_id.clone(),
			identity: identity.clone(),
			td_ids: self.tds.iter().map(|td| td.id).collect(),
			created_at: self.created_at,
		}
	}
}

/// Kind of on-chain action recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnChainAction {
	Register,
	ApplyToRequest,
}

impl OnChainAction {
	pub fn as_str(&self) -> &'static str {
		match self {
			OnChainAction::Register => "register",
			OnChainAction::ApplyToRequest => "apply_to_request",
		}
	}
}

impl fmt::Display for OnChainAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Append-only audit record of a transaction sent by the indexer.
///
/// For `Register` the request id column carries the identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnChainLogEntry {
	pub request_id: String,
	pub action: OnChainAction,
	pub tx_hash: Option<TransactionHash>,
	pub created_at: DateTime<Utc>,
}

impl OnChainLogEntry {
	pub fn new(
		request_id: impl Into<String>,
		action: OnChainAction,
		tx_hash: Option<TransactionHash>,
	) -> Self {
		Self {
			request_id: request_id.into(),
			action,
			tx_hash,
			created_at: Utc::now(),
		}
	}
}
