use std::sync::Arc;
use std::time::Duration;

use tether_domain::{BotView, ErrorCode, Platform, SecretString, TenantCredential, TraceId, UserId};
use tether_platform::InMemoryCredentialStore;
use tether_platform::testing::{FakeClientFactory, FakeHelix, tenant_credential};
use tether_platform::twitch::{ClientCache, ClientCacheConfig, SubscriptionOrchestrator, WebhookSettings};
use tether_protocol::messages::{BotGet, BotToggle, ChatMessageSend};
use tether_protocol::{Subject, Topic};

use super::bot_service::{BotService, DEFAULT_GREETING};
use super::chat::ChatService;
use super::controllers::Controllers;
use super::relay::EventRelay;
use crate::bus::InMemoryBus;
use crate::rpc::{self, Dispatcher, RequestContext};
use crate::store::{BotStore, InMemoryBotStore};

const DEFAULT_BOT: &str = "900";
const BROADCASTER: &str = "100";

struct Harness {
	app: Arc<FakeHelix>,
	bots: Arc<InMemoryBotStore>,
	credential: TenantCredential,
	chat: Arc<ChatService>,
	service: Arc<BotService>,
}

fn harness(greeting: Option<&str>) -> Harness {
	let app = Arc::new(FakeHelix::new());
	let credentials = Arc::new(InMemoryCredentialStore::new());
	let credential = tenant_credential(BROADCASTER, &["user:read:chat"]);
	credentials.insert(credential.clone());

	let cache = Arc::new(ClientCache::new(
		Platform::Twitch,
		app.clone(),
		Arc::new(FakeClientFactory::new()),
		credentials.clone(),
		&ClientCacheConfig::default(),
	));
	let orchestrator = Arc::new(SubscriptionOrchestrator::new(
		Arc::clone(&cache),
		WebhookSettings::new("https://hooks.example.com/twitch/callback", SecretString::new("webhook-secret")),
	));
	let bots = Arc::new(InMemoryBotStore::with_default_bot(DEFAULT_BOT));
	let chat = Arc::new(ChatService::new(cache));
	let service = Arc::new(BotService::new(
		Platform::Twitch,
		bots.clone(),
		credentials,
		orchestrator,
		Arc::clone(&chat),
		greeting.map(str::to_string),
	));

	Harness {
		app,
		bots,
		credential,
		chat,
		service,
	}
}

fn ctx() -> RequestContext {
	RequestContext::background("test", Duration::from_secs(5))
}

#[tokio::test]
async fn first_start_selects_default_bot_and_subscribes() {
	let h = harness(Some(DEFAULT_GREETING));
	let user = h.credential.user_id;

	h.service.start_bot(&ctx(), user).await.expect("started");

	let selection = h.bots.get_selected_bot(user).await.expect("selection");
	assert_eq!(selection.bot_id, DEFAULT_BOT);
	assert_eq!(selection.broadcaster_id, BROADCASTER);
	assert!(selection.enabled);

	let mut kinds: Vec<_> = h.app.created().into_iter().map(|c| c.kind).collect();
	kinds.sort();
	assert_eq!(kinds, vec!["channel.chat.message", "stream.offline", "stream.online"]);

	let sent = h.app.sent();
	assert_eq!(sent.len(), 1);
	assert_eq!(sent[0].message, DEFAULT_GREETING);
	assert_eq!(sent[0].sender_id, DEFAULT_BOT);
	assert_eq!(sent[0].broadcaster_id, BROADCASTER);
}

#[tokio::test]
async fn upstream_failure_keeps_committed_selection() {
	let h = harness(Some(DEFAULT_GREETING));
	let user = h.credential.user_id;
	h.app.fail_create_for("stream.online");

	let err = h.service.start_bot(&ctx(), user).await.unwrap_err();
	assert_eq!(err.code, ErrorCode::Upstream);

	let selection = h.bots.get_selected_bot(user).await.expect("selection survives");
	assert_eq!(selection.bot_id, DEFAULT_BOT);
	assert!(!selection.enabled);
	assert!(h.app.sent().is_empty());
}

#[tokio::test]
async fn start_without_linked_account_is_not_found() {
	let h = harness(None);
	let stranger = UserId::new_v4();

	let err = h.service.start_bot(&ctx(), stranger).await.unwrap_err();
	assert_eq!(err.code, ErrorCode::NotFound);
	assert!(h.bots.get_selected_bot(stranger).await.is_err());
	assert_eq!(h.app.total_calls(), 0);
}

#[tokio::test]
async fn greeting_can_be_disabled() {
	let h = harness(None);
	h.service.start_bot(&ctx(), h.credential.user_id).await.expect("started");
	assert!(h.app.sent().is_empty());
}

#[tokio::test]
async fn stop_tears_down_and_disables() {
	let h = harness(None);
	let user = h.credential.user_id;

	let err = h.service.stop_bot(&ctx(), user).await.unwrap_err();
	assert_eq!(err.code, ErrorCode::NotFound);

	h.service.start_bot(&ctx(), user).await.expect("started");
	assert_eq!(h.app.subscriptions().len(), 3);

	h.service.stop_bot(&ctx(), user).await.expect("stopped");
	assert!(h.app.subscriptions().is_empty());
	assert_eq!(h.app.deleted().len(), 3);
	assert!(!h.bots.get_selected_bot(user).await.expect("selection").enabled);
}

#[tokio::test]
async fn get_bot_reports_selection() {
	let h = harness(None);
	let user = h.credential.user_id;

	let err = h.service.get_bot(&ctx(), user).await.unwrap_err();
	assert_eq!(err.code, ErrorCode::NotFound);

	h.service.start_bot(&ctx(), user).await.expect("started");
	let view = h.service.get_bot(&ctx(), user).await.expect("view");
	assert_eq!(
		view,
		BotView {
			platform: Platform::Twitch,
			bot_id: DEFAULT_BOT.to_string(),
			user_id: user,
			broadcaster_id: BROADCASTER.to_string(),
			enabled: true,
		}
	);
}

#[tokio::test]
async fn default_bot_change_passes_through() {
	let h = harness(None);
	h.service.change_default_bot("901").await.expect("changed");
	assert_eq!(h.bots.get_default_bot().await.expect("default").bot_id, "901");
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
	tokio::time::timeout(Duration::from_secs(2), async {
		while !cond() {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.expect("condition not reached in time");
}

fn subject(topic: Topic) -> Subject {
	topic.builder().platform(Platform::Twitch).build_subject().unwrap()
}

#[tokio::test]
async fn handlers_answer_over_the_bus() {
	let h = harness(None);
	let bus = Arc::new(InMemoryBus::new());
	let dispatcher = Dispatcher::new(bus.clone(), Duration::from_secs(5));
	let controllers = Controllers {
		platform: Platform::Twitch,
		bots: Arc::clone(&h.service),
		chat: Arc::clone(&h.chat),
		relay: Arc::new(EventRelay::new(Platform::Twitch, h.bots.clone(), bus.clone())),
	};
	controllers.connect(&dispatcher).await.expect("handlers registered");

	let user = h.credential.user_id;
	let trace = TraceId::new("bus-1");

	let started: bool = rpc::request(
		bus.as_ref(),
		&subject(Topic::PlatformStartBot),
		&trace,
		&BotToggle { user_id: user },
		Duration::from_secs(2),
	)
	.await
	.expect("start reply");
	assert!(started);

	let view: BotView = rpc::request(
		bus.as_ref(),
		&subject(Topic::PlatformGetBot),
		&trace,
		&BotGet { user_id: user },
		Duration::from_secs(2),
	)
	.await
	.expect("get reply");
	assert!(view.enabled);

	let missing = rpc::request::<_, BotView>(
		bus.as_ref(),
		&subject(Topic::PlatformGetBot),
		&trace,
		&BotGet {
			user_id: UserId::new_v4(),
		},
		Duration::from_secs(2),
	)
	.await
	.unwrap_err();
	assert_eq!(missing.code, ErrorCode::NotFound);

	rpc::publish(
		bus.as_ref(),
		&subject(Topic::PlatformChatMessageSend),
		&trace,
		&ChatMessageSend {
			bot_id: DEFAULT_BOT.into(),
			broadcaster_id: BROADCASTER.into(),
			message: "hello".into(),
			reply_to: Some("parent-1".into()),
		},
	)
	.await
	.expect("published");
	wait_until(|| !h.app.sent().is_empty()).await;
	let sent = h.app.sent();
	assert_eq!(sent[0].message, "hello");
	assert_eq!(sent[0].reply_parent_message_id.as_deref(), Some("parent-1"));

	dispatcher.shutdown();
}
