#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use parking_lot::Mutex;
use tether_protocol::SubjectPattern;
use tokio::sync::mpsc;

use super::{BusMessage, BusSubscription, MessageBus, SUBSCRIPTION_BUFFER};

struct Subscriber {
	pattern: SubjectPattern,
	group: Option<String>,
	tx: mpsc::Sender<BusMessage>,
}

#[derive(Default)]
struct State {
	subscribers: Vec<Subscriber>,
	/// Round-robin position per queue group.
	cursors: HashMap<String, usize>,
}

/// Process-local bus with the same delivery rules as the broker: fan-out to plain
/// subscribers, one member per queue group, request/reply over private inboxes.
pub struct InMemoryBus {
	state: Mutex<State>,
	connected: AtomicBool,
}

impl Default for InMemoryBus {
	fn default() -> Self {
		Self {
			state: Mutex::new(State::default()),
			connected: AtomicBool::new(true),
		}
	}
}

impl InMemoryBus {
	pub fn new() -> Self {
		Self::default()
	}

	/// Simulate losing (or regaining) the broker connection.
	#[cfg(test)]
	pub fn set_connected(&self, connected: bool) {
		self.connected.store(connected, Ordering::SeqCst);
	}

	fn add(&self, pattern: &str, group: Option<&str>) -> anyhow::Result<BusSubscription> {
		let pattern = SubjectPattern::parse(pattern).with_context(|| format!("invalid subscribe pattern {pattern:?}"))?;
		let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
		self.state.lock().subscribers.push(Subscriber {
			pattern,
			group: group.map(str::to_string),
			tx,
		});
		Ok(BusSubscription::new(rx))
	}

	fn route(&self, subject: &str) -> Vec<mpsc::Sender<BusMessage>> {
		let mut guard = self.state.lock();
		let st = &mut *guard;
		st.subscribers.retain(|s| !s.tx.is_closed());

		let mut targets = Vec::new();
		let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
		for (idx, sub) in st.subscribers.iter().enumerate() {
			if !sub.pattern.matches(subject) {
				continue;
			}
			match sub.group.as_deref() {
				None => targets.push(sub.tx.clone()),
				Some(group) => groups.entry(group).or_default().push(idx),
			}
		}

		for (group, members) in groups {
			let cursor = st.cursors.entry(group.to_string()).or_insert(0);
			let pick = members[*cursor % members.len()];
			*cursor = cursor.wrapping_add(1);
			targets.push(st.subscribers[pick].tx.clone());
		}

		targets
	}

	async fn deliver(&self, subject: &str, reply: Option<String>, payload: Bytes) -> anyhow::Result<usize> {
		if !self.is_connected() {
			anyhow::bail!("bus disconnected");
		}

		let targets = self.route(subject);
		for tx in &targets {
			let msg = BusMessage {
				subject: subject.to_string(),
				reply: reply.clone(),
				payload: payload.clone(),
			};
			// a receiver dropped between routing and sending just misses the message
			let _ = tx.send(msg).await;
		}
		Ok(targets.len())
	}
}

#[async_trait::async_trait]
impl MessageBus for InMemoryBus {
	async fn publish(&self, subject: &str, payload: Bytes) -> anyhow::Result<()> {
		self.deliver(subject, None, payload).await?;
		Ok(())
	}

	async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> anyhow::Result<Bytes> {
		let inbox = format!("_INBOX.{}", uuid::Uuid::new_v4().simple());
		let mut replies = self.add(&inbox, None)?;

		if self.deliver(subject, Some(inbox), payload).await? == 0 {
			anyhow::bail!("no responders for {subject}");
		}

		match tokio::time::timeout(timeout, replies.next()).await {
			Ok(Some(msg)) => Ok(msg.payload),
			Ok(None) => anyhow::bail!("reply subscription for {subject} closed"),
			Err(_) => anyhow::bail!("request to {subject} timed out after {timeout:?}"),
		}
	}

	async fn subscribe(&self, pattern: &str) -> anyhow::Result<BusSubscription> {
		self.add(pattern, None)
	}

	async fn queue_subscribe(&self, pattern: &str, group: &str) -> anyhow::Result<BusSubscription> {
		self.add(pattern, Some(group))
	}

	fn is_connected(&self) -> bool {
		self.connected.load(Ordering::SeqCst)
	}
}
