use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tether_domain::{ChatMessageEvent, ChatterRole, NewPlatformBot, Platform, StreamStatus, StreamStatusEvent, UserId};
use tether_protocol::messages::WebhookNotification;
use tether_protocol::{Request, decode_request};

use super::relay::EventRelay;
use crate::bus::{BusSubscription, InMemoryBus, MessageBus};
use crate::rpc::RequestContext;
use crate::store::{BotStore, InMemoryBotStore};

const BROADCASTER: &str = "100";

async fn relay_with_selection() -> (Arc<InMemoryBus>, EventRelay, UserId) {
	let bus = Arc::new(InMemoryBus::new());
	let bots = Arc::new(InMemoryBotStore::new());
	let user = UserId::new_v4();
	bots.create_bot(NewPlatformBot {
		user_id: user,
		bot_id: "900".into(),
		broadcaster_id: BROADCASTER.into(),
	})
	.await
	.unwrap();
	bots.change_selected_bot(user, "900").await.unwrap();

	let relay = EventRelay::new(Platform::Twitch, bots, bus.clone());
	(bus, relay, user)
}

fn ctx() -> RequestContext {
	RequestContext::background("webhook.notification.twitch", Duration::from_secs(5))
}

fn notification(subscription_type: &str, event: serde_json::Value) -> WebhookNotification {
	WebhookNotification {
		subscription_type: subscription_type.to_string(),
		subscription_version: Some("1".into()),
		message_id: Some("msg-1".into()),
		event,
	}
}

fn chat_event(text: &str) -> serde_json::Value {
	json!({
		"broadcaster_user_id": BROADCASTER,
		"broadcaster_user_login": "streamer",
		"broadcaster_user_name": "Streamer",
		"chatter_user_id": "555",
		"chatter_user_login": "viewer",
		"chatter_user_name": "Viewer",
		"message_id": "m-1",
		"message": { "text": text },
		"badges": [{ "set_id": "moderator", "id": "1", "info": "" }],
		"reply": null
	})
}

async fn next_payload<T: serde::de::DeserializeOwned>(sub: &mut BusSubscription) -> Request<T> {
	let msg = tokio::time::timeout(Duration::from_secs(1), sub.next())
		.await
		.expect("event published")
		.expect("subscription open");
	decode_request::<T>(&msg.payload).expect("valid envelope")
}

async fn nothing_published(sub: &mut BusSubscription) {
	assert!(
		tokio::time::timeout(Duration::from_millis(50), sub.next()).await.is_err(),
		"unexpected event"
	);
}

#[tokio::test]
async fn chat_message_is_relayed_to_broadcaster_subject() {
	let (bus, relay, user) = relay_with_selection().await;
	let mut sub = bus.subscribe("event.chat_message.twitch.100").await.unwrap();
	let ctx = ctx();

	relay
		.handle(&ctx, notification("channel.chat.message", chat_event("hello\u{E0000}")))
		.await
		.expect("relayed");

	let req = next_payload::<ChatMessageEvent>(&mut sub).await;
	assert_eq!(req.trace_id, ctx.trace_id);
	let event = req.data;
	assert_eq!(event.user_id, user);
	assert_eq!(event.bot_id, "900");
	assert_eq!(event.message, "hello");
	assert_eq!(event.chatter_login, "viewer");
	assert_eq!(event.chatter_role, ChatterRole::Moderator);
	assert!(event.reply_to.is_none());
}

#[tokio::test]
async fn stream_status_changes_are_relayed() {
	let (bus, relay, user) = relay_with_selection().await;
	let mut online = bus.subscribe("event.stream_online.twitch.100").await.unwrap();
	let mut offline = bus.subscribe("event.stream_offline.twitch.100").await.unwrap();

	relay
		.handle(
			&ctx(),
			notification(
				"stream.online",
				json!({
					"id": "s-1",
					"broadcaster_user_id": BROADCASTER,
					"broadcaster_user_login": "streamer",
					"broadcaster_user_name": "Streamer",
					"type": "live",
					"started_at": "2024-05-01T18:30:00.123Z"
				}),
			),
		)
		.await
		.expect("online relayed");

	let event = next_payload::<StreamStatusEvent>(&mut online).await.data;
	assert_eq!(event.status, StreamStatus::Online);
	assert_eq!(event.user_id, user);
	assert_eq!(event.started_at.as_deref(), Some("2024-05-01T18:30:00Z"));

	relay
		.handle(
			&ctx(),
			notification(
				"stream.offline",
				json!({
					"broadcaster_user_id": BROADCASTER,
					"broadcaster_user_login": "streamer",
					"broadcaster_user_name": "Streamer"
				}),
			),
		)
		.await
		.expect("offline relayed");

	let event = next_payload::<StreamStatusEvent>(&mut offline).await.data;
	assert_eq!(event.status, StreamStatus::Offline);
	assert!(event.started_at.is_none());
}

#[tokio::test]
async fn unknown_broadcaster_is_dropped() {
	let (bus, relay, _user) = relay_with_selection().await;
	let mut sub = bus.subscribe("event.*.twitch.*").await.unwrap();

	let mut event = chat_event("hi");
	event["broadcaster_user_id"] = json!("999");
	relay
		.handle(&ctx(), notification("channel.chat.message", event))
		.await
		.expect("dropped quietly");

	nothing_published(&mut sub).await;
}

#[tokio::test]
async fn unsupported_and_malformed_notifications_are_dropped() {
	let (bus, relay, _user) = relay_with_selection().await;
	let mut sub = bus.subscribe("event.*.twitch.*").await.unwrap();

	relay
		.handle(&ctx(), notification("channel.follow", json!({ "broadcaster_user_id": BROADCASTER })))
		.await
		.expect("unsupported type ignored");
	relay
		.handle(&ctx(), notification("channel.chat.message", json!({ "unexpected": true })))
		.await
		.expect("malformed event ignored");

	nothing_published(&mut sub).await;
}
