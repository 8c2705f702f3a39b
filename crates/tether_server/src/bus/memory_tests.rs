use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::{InMemoryBus, MessageBus};

async fn drain(sub: &mut super::BusSubscription) -> usize {
	let mut n = 0;
	while let Ok(Some(_)) = tokio::time::timeout(Duration::from_millis(20), sub.next()).await {
		n += 1;
	}
	n
}

#[tokio::test]
async fn queue_group_delivers_each_message_once() {
	let bus = InMemoryBus::new();
	let mut a = bus.queue_subscribe("platform.start_bot.twitch", "platform.start_bot.twitch").await.unwrap();
	let mut b = bus.queue_subscribe("platform.start_bot.twitch", "platform.start_bot.twitch").await.unwrap();

	for i in 0..10 {
		bus.publish("platform.start_bot.twitch", Bytes::from(format!("{i}")))
			.await
			.unwrap();
	}

	let (got_a, got_b) = (drain(&mut a).await, drain(&mut b).await);
	assert_eq!(got_a + got_b, 10);
	assert!(got_a > 0 && got_b > 0, "round robin should use both members: {got_a}/{got_b}");
}

#[tokio::test]
async fn plain_subscribers_all_receive_and_wildcards_match() {
	let bus = InMemoryBus::new();
	let mut exact = bus.subscribe("event.chat_message.twitch.100").await.unwrap();
	let mut wild = bus.subscribe("event.chat_message.twitch.*").await.unwrap();
	let mut other = bus.subscribe("event.stream_online.twitch.*").await.unwrap();

	bus.publish("event.chat_message.twitch.100", Bytes::from_static(b"x")).await.unwrap();
	bus.publish("event.chat_message.twitch.200", Bytes::from_static(b"y")).await.unwrap();

	assert_eq!(drain(&mut exact).await, 1);
	assert_eq!(drain(&mut wild).await, 2);
	assert_eq!(drain(&mut other).await, 0);
}

#[tokio::test]
async fn request_gets_reply_on_private_inbox() {
	let bus = Arc::new(InMemoryBus::new());
	let mut responder = bus.queue_subscribe("auth.provider_get", "auth.provider_get").await.unwrap();

	let server = {
		let bus = Arc::clone(&bus);
		tokio::spawn(async move {
			let msg = responder.next().await.expect("request");
			let reply = msg.reply.expect("reply subject");
			assert!(reply.starts_with("_INBOX."));
			bus.publish(&reply, Bytes::from_static(b"pong")).await.unwrap();
		})
	};

	let answer = bus
		.request("auth.provider_get", Bytes::from_static(b"ping"), Duration::from_secs(1))
		.await
		.unwrap();
	assert_eq!(&answer[..], b"pong");
	server.await.unwrap();
}

#[tokio::test]
async fn request_without_responders_fails_fast() {
	let bus = InMemoryBus::new();
	let err = bus
		.request("auth.provider_get", Bytes::new(), Duration::from_secs(5))
		.await
		.unwrap_err();
	assert!(err.to_string().contains("no responders"));
}

#[tokio::test]
async fn dropped_subscription_stops_receiving() {
	let bus = InMemoryBus::new();
	let sub = bus.subscribe("webhook.notification.twitch").await.unwrap();
	drop(sub);
	let mut live = bus.subscribe("webhook.notification.twitch").await.unwrap();

	bus.publish("webhook.notification.twitch", Bytes::new()).await.unwrap();
	assert_eq!(drain(&mut live).await, 1);
}

#[tokio::test]
async fn disconnected_bus_rejects_publish() {
	let bus = InMemoryBus::new();
	bus.set_connected(false);
	assert!(!bus.is_connected());
	assert!(bus.publish("webhook.notification.twitch", Bytes::new()).await.is_err());
}
