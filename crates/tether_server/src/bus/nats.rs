#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{BusMessage, BusSubscription, MessageBus, SUBSCRIPTION_BUFFER};

/// Broker-backed bus over a NATS connection.
pub struct NatsBus {
	client: async_nats::Client,
}

impl NatsBus {
	pub async fn connect(url: &str, name: &str) -> anyhow::Result<Self> {
		let client = async_nats::ConnectOptions::new()
			.name(name)
			.retry_on_initial_connect()
			.request_timeout(None)
			.connect(url)
			.await
			.with_context(|| format!("connect to message broker at {url}"))?;

		info!(%url, "connected to message broker");
		Ok(Self { client })
	}

	fn forward(mut subscriber: async_nats::Subscriber, pattern: String) -> BusSubscription {
		let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
		tokio::spawn(async move {
			while let Some(msg) = subscriber.next().await {
				let msg = BusMessage {
					subject: msg.subject.to_string(),
					reply: msg.reply.map(|r| r.to_string()),
					payload: msg.payload,
				};
				if tx.send(msg).await.is_err() {
					break;
				}
			}
			if let Err(e) = subscriber.unsubscribe().await {
				debug!(%pattern, error = %e, "unsubscribe after stream end failed");
			}
			debug!(%pattern, "subscription forwarder stopped");
		});
		BusSubscription::new(rx)
	}
}

#[async_trait::async_trait]
impl MessageBus for NatsBus {
	async fn publish(&self, subject: &str, payload: Bytes) -> anyhow::Result<()> {
		self.client
			.publish(subject.to_string(), payload)
			.await
			.with_context(|| format!("publish to {subject}"))
	}

	async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> anyhow::Result<Bytes> {
		let msg = tokio::time::timeout(timeout, self.client.request(subject.to_string(), payload))
			.await
			.map_err(|_| anyhow::anyhow!("request to {subject} timed out after {timeout:?}"))?
			.with_context(|| format!("request to {subject}"))?;
		Ok(msg.payload)
	}

	async fn subscribe(&self, pattern: &str) -> anyhow::Result<BusSubscription> {
		let sub = self
			.client
			.subscribe(pattern.to_string())
			.await
			.with_context(|| format!("subscribe to {pattern}"))?;
		Ok(Self::forward(sub, pattern.to_string()))
	}

	async fn queue_subscribe(&self, pattern: &str, group: &str) -> anyhow::Result<BusSubscription> {
		let sub = self
			.client
			.queue_subscribe(pattern.to_string(), group.to_string())
			.await
			.with_context(|| format!("queue subscribe to {pattern} (group {group})"))?;
		Ok(Self::forward(sub, pattern.to_string()))
	}

	fn is_connected(&self) -> bool {
		matches!(self.client.connection_state(), async_nats::connection::State::Connected)
	}

	async fn flush(&self) -> anyhow::Result<()> {
		self.client.flush().await.context("flush message broker connection")
	}
}
