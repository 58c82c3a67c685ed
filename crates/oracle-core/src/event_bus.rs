//! Event bus for broadcasting orchestration events.
//!
//! Wraps a tokio broadcast channel. Publishing never blocks; a bus with no
//! subscribers simply drops the event, which callers ignore with `.ok()`.

use oracle_types::OracleEvent;
use tokio::sync::broadcast;

/// Default number of events buffered per subscriber.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Multi-consumer channel for oracle events.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<OracleEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Receives every event published after this call.
	pub fn subscribe(&self) -> broadcast::Receiver<OracleEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event to all current subscribers.
	///
	/// Fails only when nobody is subscribed.
	pub fn publish(
		&self,
		event: OracleEvent,
	) -> Result<(), broadcast::error::SendError<OracleEvent>> {
		self.sender.send(event)?;
		Ok(())
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(DEFAULT_CAPACITY)
	}
}
