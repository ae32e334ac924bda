//! Events published while requests move through the offer pipeline.

use serde::Serialize;

use crate::{RequestId, TransactionHash};

#[derive(Debug, Clone, Serialize)]
pub enum IndexerEvent {
	Request(RequestEvent),
	Offer(OfferEvent),
}

#[derive(Debug, Clone, Serialize)]
pub enum RequestEvent {
	Received {
		request_id: RequestId,
		required_type: String,
	},
	Matched {
		request_id: RequestId,
		matches: usize,
	},
	NoMatch {
		request_id: RequestId,
	},
	Duplicate {
		request_id: RequestId,
	},
}

#[derive(Debug, Clone, Serialize)]
pub enum OfferEvent {
	Offered {
		request_id: RequestId,
		tx_hash: TransactionHash,
	},
	Failed {
		request_id: RequestId,
		error: String,
	},
	Persisted {
		request_id: RequestId,
		rows: u64,
	},
	PersistFailed {
		request_id: RequestId,
		error: String,
	},
}
