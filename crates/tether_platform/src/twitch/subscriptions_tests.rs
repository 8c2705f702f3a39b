use std::sync::Arc;
use std::time::Duration;

use tether_domain::{ErrorCode, Platform, SecretString};

use super::clients::{ClientCache, ClientCacheConfig};
use super::eventsub::EventSubType;
use super::helix::SubscriptionPage;
use super::subscriptions::{SubscribeAs, SubscriptionOrchestrator, WebhookSettings};
use crate::InMemoryCredentialStore;
use crate::testing::{FakeClientFactory, FakeHelix, subscription, tenant_credential};

const CALLBACK: &str = "https://hooks.example.com/twitch/callback";

struct Harness {
	app: Arc<FakeHelix>,
	factory: Arc<FakeClientFactory>,
	orchestrator: SubscriptionOrchestrator,
}

fn harness_with(app: FakeHelix, delete_concurrency: usize) -> Harness {
	harness_with_settings(app, |settings| settings.delete_concurrency = delete_concurrency)
}

fn harness_with_settings(app: FakeHelix, tweak: impl FnOnce(&mut WebhookSettings)) -> Harness {
	let app = Arc::new(app);
	let factory = Arc::new(FakeClientFactory::new());
	let cache = ClientCache::new(
		Platform::Twitch,
		app.clone(),
		factory.clone(),
		Arc::new(InMemoryCredentialStore::new()),
		&ClientCacheConfig::default(),
	);
	let mut settings = WebhookSettings::new(CALLBACK, SecretString::new("webhook-secret"));
	tweak(&mut settings);

	Harness {
		app,
		factory,
		orchestrator: SubscriptionOrchestrator::new(Arc::new(cache), settings),
	}
}

fn harness() -> Harness {
	harness_with(FakeHelix::new(), 8)
}

#[tokio::test]
async fn missing_scope_is_forbidden_without_upstream_calls() {
	let h = harness();
	let cred = tenant_credential("2001", &["user:write:chat"]);

	let err = h
		.orchestrator
		.subscribe(SubscribeAs::User(&cred), "100", EventSubType::ChannelChatMessage)
		.await
		.unwrap_err();

	assert_eq!(err.code, ErrorCode::Forbidden);
	assert!(err.message.contains("user:read:chat"));
	assert_eq!(h.app.total_calls(), 0);
	assert_eq!(h.factory.constructions(), 0);
}

#[tokio::test]
async fn event_types_without_scope_requirements_pass_the_gate() {
	let h = harness();
	let cred = tenant_credential("2001", &[]);
	h.orchestrator
		.can_subscribe(&cred, EventSubType::StreamOnline)
		.expect("no scopes required");
}

#[tokio::test]
async fn configured_scope_table_is_enforced() {
	let h = harness_with_settings(FakeHelix::new(), |settings| {
		settings.required_scopes.insert(
			EventSubType::StreamOnline.as_str().to_string(),
			vec!["channel:read:stream_key".to_string()],
		);
		settings.required_scopes.remove(EventSubType::ChannelChatMessage.as_str());
	});
	let cred = tenant_credential("2001", &[]);

	let err = h
		.orchestrator
		.subscribe(SubscribeAs::User(&cred), "100", EventSubType::StreamOnline)
		.await
		.unwrap_err();
	assert_eq!(err.code, ErrorCode::Forbidden);
	assert!(err.message.contains("channel:read:stream_key"));
	assert_eq!(h.factory.constructions(), 0);

	// dropped from the table, so no longer gated
	h.orchestrator
		.can_subscribe(&cred, EventSubType::ChannelChatMessage)
		.expect("not gated");
}

#[tokio::test]
async fn user_subscription_goes_through_cached_client() {
	let h = harness();
	let cred = tenant_credential("2001", &["user:read:chat"]);

	h.orchestrator
		.subscribe(SubscribeAs::User(&cred), "100", EventSubType::ChannelChatMessage)
		.await
		.expect("subscribed");

	assert_eq!(h.factory.constructions(), 1);
	// the app client is not used for tenant subscriptions
	assert_eq!(h.app.total_calls(), 0);
}

#[tokio::test]
async fn bot_subscription_carries_condition_and_webhook_transport() {
	let h = harness();
	h.orchestrator
		.subscribe(SubscribeAs::Bot("900"), "100", EventSubType::ChannelChatMessage)
		.await
		.expect("subscribed");

	let created = h.app.created();
	assert_eq!(created.len(), 1);
	let req = &created[0];
	assert_eq!(req.kind, "channel.chat.message");
	assert_eq!(req.version, "1");
	assert_eq!(req.condition.broadcaster_user_id.as_deref(), Some("100"));
	assert_eq!(req.condition.user_id.as_deref(), Some("900"));
	assert_eq!(req.transport.method, "webhook");
	assert_eq!(req.transport.callback.as_deref(), Some(CALLBACK));
	assert_eq!(req.transport.secret.as_ref().map(|s| s.expose()), Some("webhook-secret"));
}

#[tokio::test]
async fn partial_subscribe_is_not_rolled_back() {
	let h = harness();
	h.app.fail_create_for(EventSubType::StreamOnline.as_str());

	let err = h.orchestrator.subscribe_all("900", "100").await.unwrap_err();
	assert_eq!(err.code, ErrorCode::Upstream);
	assert_eq!(err.failure_count(), 1);
	assert_eq!(h.app.created().len(), 3);

	let kinds: Vec<_> = h.app.subscriptions().into_iter().map(|s| s.kind).collect();
	assert_eq!(kinds, vec!["channel.chat.message", "stream.offline"]);

	h.orchestrator.unsubscribe_all("900", "100").await.expect("teardown");
	let mut deleted = h.app.deleted();
	deleted.sort();
	assert_eq!(deleted.len(), 2);
	assert!(h.app.subscriptions().is_empty());
}

#[tokio::test]
async fn teardown_walks_pages_and_deletes_only_matches() {
	let h = harness();
	h.app.script_pages(vec![
		SubscriptionPage {
			data: vec![
				subscription("a", "channel.chat.message", "100", Some("900")),
				subscription("b", "channel.chat.message", "100", Some("901")),
				subscription("c", "stream.online", "100", None),
			],
			cursor: Some("page-2".to_string()),
		},
		SubscriptionPage {
			data: vec![
				subscription("d", "stream.offline", "100", None),
				subscription("e", "stream.offline", "555", None),
			],
			cursor: None,
		},
		SubscriptionPage::default(),
	]);

	h.orchestrator.unsubscribe_all("900", "100").await.expect("teardown");

	let calls = h.app.list_calls();
	assert_eq!(calls.len(), 2);
	assert_eq!(calls[0].1, None);
	assert_eq!(calls[1].1.as_deref(), Some("page-2"));

	let mut deleted = h.app.deleted();
	deleted.sort();
	assert_eq!(deleted, vec!["a", "c", "d"]);
}

#[tokio::test]
async fn teardown_stops_on_empty_page() {
	let h = harness();
	h.app.script_pages(vec![
		SubscriptionPage {
			data: vec![subscription("a", "stream.online", "100", None)],
			cursor: Some("next".to_string()),
		},
		SubscriptionPage {
			data: Vec::new(),
			cursor: Some("dangling".to_string()),
		},
	]);

	h.orchestrator.unsubscribe_all("900", "100").await.expect("teardown");
	assert_eq!(h.app.list_calls().len(), 2);
	assert_eq!(h.app.deleted(), vec!["a"]);
}

#[tokio::test]
async fn teardown_without_matches_issues_no_deletes() {
	let h = harness();
	h.app.seed(subscription("x", "stream.online", "555", None));

	h.orchestrator.unsubscribe_all("900", "100").await.expect("nothing to do");
	assert!(h.app.deleted().is_empty());
}

#[tokio::test]
async fn delete_failures_are_aggregated() {
	let h = harness();
	for id in ["a", "b", "c"] {
		h.app.seed(subscription(id, "stream.online", "100", None));
	}
	h.app.fail_delete_for("a");
	h.app.fail_delete_for("c");

	let err = h.orchestrator.unsubscribe_all("900", "100").await.unwrap_err();
	assert_eq!(err.code, ErrorCode::Upstream);
	assert_eq!(err.failure_count(), 2);
	// every delete was attempted
	assert_eq!(h.app.deleted().len(), 3);
	assert_eq!(h.app.subscriptions().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_fan_out_is_bounded() {
	let h = harness_with(FakeHelix::with_delay(Duration::from_millis(20)), 2);
	for i in 0..8 {
		h.app.seed(subscription(&format!("s{i}"), "stream.online", "100", None));
	}

	h.orchestrator.unsubscribe_all("900", "100").await.expect("teardown");

	assert_eq!(h.app.deleted().len(), 8);
	assert!(h.app.max_in_flight() <= 2, "max in flight was {}", h.app.max_in_flight());
}

#[tokio::test]
async fn single_unsubscribe_maps_rejection_to_upstream() {
	let h = harness();
	h.app.seed(subscription("a", "stream.online", "100", None));
	h.app.fail_delete_for("a");

	let err = h.orchestrator.unsubscribe("a").await.unwrap_err();
	assert_eq!(err.code, ErrorCode::Upstream);

	h.orchestrator.unsubscribe("zzz").await.expect("fake accepts unknown ids");
}
