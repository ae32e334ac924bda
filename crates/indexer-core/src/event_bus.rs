//! Event bus for observing the offer pipeline.
//!
//! A broadcast channel: every subscriber receives its own copy of each event
//! published after it subscribed.

use indexer_types::IndexerEvent;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<IndexerEvent>,
}

impl EventBus {
	/// Creates a bus that buffers up to `capacity` events per lagging
	/// subscriber before the oldest are dropped.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<IndexerEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event to all current subscribers.
	///
	/// Fails only when nobody is subscribed.
	pub fn publish(
		&self,
		event: IndexerEvent,
	) -> Result<(), broadcast::error::SendError<IndexerEvent>> {
		self.sender.send(event)?;
		Ok(())
	}
}
