#![forbid(unsafe_code)]

//! Publish/subscribe transport shared with the other services.

mod memory;
#[cfg(feature = "nats")]
mod nats;

#[cfg(test)]
mod memory_tests;

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

pub use memory::InMemoryBus;
#[cfg(feature = "nats")]
pub use nats::NatsBus;

/// Inbound message as seen by a subscriber.
#[derive(Debug, Clone)]
pub struct BusMessage {
	pub subject: String,
	/// Subject the sender waits on for a response, if any.
	pub reply: Option<String>,
	pub payload: Bytes,
}

/// Stream of messages for one subscription. Dropping it unsubscribes.
pub struct BusSubscription {
	rx: mpsc::Receiver<BusMessage>,
}

impl BusSubscription {
	pub(crate) fn new(rx: mpsc::Receiver<BusMessage>) -> Self {
		Self { rx }
	}

	pub async fn next(&mut self) -> Option<BusMessage> {
		self.rx.recv().await
	}
}

/// Buffered messages per subscription before publishers wait.
pub(crate) const SUBSCRIPTION_BUFFER: usize = 256;

#[async_trait::async_trait]
pub trait MessageBus: Send + Sync + 'static {
	async fn publish(&self, subject: &str, payload: Bytes) -> anyhow::Result<()>;

	/// Publish with a private reply subject and wait for the first answer.
	async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> anyhow::Result<Bytes>;

	/// Every matching message goes to every plain subscriber.
	async fn subscribe(&self, pattern: &str) -> anyhow::Result<BusSubscription>;

	/// Each matching message goes to exactly one member of `group`.
	async fn queue_subscribe(&self, pattern: &str, group: &str) -> anyhow::Result<BusSubscription>;

	fn is_connected(&self) -> bool;

	/// Push out anything still buffered. Called once on shutdown.
	async fn flush(&self) -> anyhow::Result<()> {
		Ok(())
	}
}
