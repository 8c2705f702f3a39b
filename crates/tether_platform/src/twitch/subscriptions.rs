#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use tether_domain::{AppError, SecretString, TenantCredential};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::clients::ClientCache;
use super::eventsub::EventSubType;
use super::helix::{CreateSubscription, EventSubTransport, HelixApi, HelixSubscription};

/// Webhook transport and scope prerequisites for EventSub subscriptions.
#[derive(Debug, Clone)]
pub struct WebhookSettings {
	/// Absolute https URL Twitch delivers notifications to.
	pub callback_url: String,
	pub secret: SecretString,
	/// Event type -> scopes the subscribing user must hold. Types not listed need none.
	pub required_scopes: BTreeMap<String, Vec<String>>,
	/// Upper bound on concurrent delete calls during teardown.
	pub delete_concurrency: usize,
}

/// Scope table used when none is configured: reading chat needs `user:read:chat`.
pub fn default_required_scopes() -> BTreeMap<String, Vec<String>> {
	BTreeMap::from([(
		EventSubType::ChannelChatMessage.as_str().to_string(),
		vec!["user:read:chat".to_string()],
	)])
}

impl WebhookSettings {
	pub fn new(callback_url: impl Into<String>, secret: SecretString) -> Self {
		Self {
			callback_url: callback_url.into(),
			secret,
			required_scopes: default_required_scopes(),
			delete_concurrency: 8,
		}
	}

	fn transport(&self) -> EventSubTransport {
		EventSubTransport::webhook(self.callback_url.clone(), self.secret.clone())
	}
}

/// Whose authority a subscription is created under.
#[derive(Debug, Clone, Copy)]
pub enum SubscribeAs<'a> {
	/// Platform bot, through the app client. The bot id becomes the condition user.
	Bot(&'a str),
	/// A tenant's own account, through its cached client. Scope-gated.
	User(&'a TenantCredential),
}

/// Creates, enumerates and tears down EventSub webhook subscriptions.
///
/// Keeps no local record of subscription ids; teardown lists them upstream.
pub struct SubscriptionOrchestrator {
	clients: Arc<ClientCache>,
	settings: WebhookSettings,
}

impl SubscriptionOrchestrator {
	pub fn new(clients: Arc<ClientCache>, settings: WebhookSettings) -> Self {
		Self { clients, settings }
	}

	pub fn clients(&self) -> &Arc<ClientCache> {
		&self.clients
	}

	pub fn can_subscribe(&self, credential: &TenantCredential, event_type: EventSubType) -> Result<(), AppError> {
		let Some(required) = self.settings.required_scopes.get(event_type.as_str()) else {
			return Ok(());
		};

		let missing = credential.missing_scopes(required);
		if missing.is_empty() {
			return Ok(());
		}

		warn!(
			account_id = %credential.account_id,
			user_id = %credential.user_id,
			event_type = %event_type,
			granted = ?credential.scopes,
			required = ?required,
			missing = ?missing,
			"cannot subscribe, missing scopes"
		);
		Err(AppError::forbidden(format!(
			"cannot subscribe to {event_type}: missing scopes {}",
			missing.join(", ")
		)))
	}

	pub async fn subscribe(
		&self,
		identity: SubscribeAs<'_>,
		broadcaster_id: &str,
		event_type: EventSubType,
	) -> Result<(), AppError> {
		let (client, condition_user) = match identity {
			SubscribeAs::Bot(bot_id) => (self.clients.app_client(), bot_id),
			SubscribeAs::User(credential) => {
				self.can_subscribe(credential, event_type)?;
				let client = self.clients.get_or_create_by_credential(credential).await?;
				(client, credential.account_id.as_str())
			}
		};

		let req = CreateSubscription {
			kind: event_type.as_str().to_string(),
			version: event_type.version().to_string(),
			condition: event_type.condition(broadcaster_id, condition_user),
			transport: self.settings.transport(),
		};

		metrics::counter!("tether_eventsub_subscribe_total").increment(1);

		match client.create_eventsub_subscription(&req).await {
			Ok(resp) if resp.is_success() => {
				let subscription_id = resp.data.first().map(|s| s.id.as_str()).unwrap_or_default();
				info!(%event_type, broadcaster_id, user_id = condition_user, subscription_id, "eventsub subscription created");
				Ok(())
			}
			Ok(resp) => {
				warn!(%event_type, broadcaster_id, user_id = condition_user, upstream = %resp.describe(), "eventsub subscription rejected");
				metrics::counter!("tether_eventsub_subscribe_errors_total").increment(1);
				Err(AppError::upstream(format!(
					"create {event_type} subscription for broadcaster {broadcaster_id} rejected with status {}",
					resp.status
				)))
			}
			Err(e) => {
				warn!(%event_type, broadcaster_id, user_id = condition_user, error = ?e, "eventsub subscription request failed");
				metrics::counter!("tether_eventsub_subscribe_errors_total").increment(1);
				Err(AppError::upstream(format!(
					"create {event_type} subscription for broadcaster {broadcaster_id} failed"
				)))
			}
		}
	}

	/// Subscribe the bot to every default event type. Each type is attempted; nothing is rolled back.
	pub async fn subscribe_all(&self, bot_id: &str, broadcaster_id: &str) -> Result<(), AppError> {
		let mut errors = Vec::new();
		for event_type in EventSubType::BOT_DEFAULTS {
			if let Err(e) = self.subscribe(SubscribeAs::Bot(bot_id), broadcaster_id, event_type).await {
				errors.push(e);
			}
		}

		match AppError::join(errors) {
			None => Ok(()),
			Some(err) => {
				warn!(bot_id, broadcaster_id, failures = err.failure_count(), "subscribe_all partially failed");
				Err(err)
			}
		}
	}

	/// Delete every subscription of the bot that targets `broadcaster_id`.
	///
	/// The listing is filtered by broadcaster, not by bot: `stream.online` and
	/// `stream.offline` conditions carry no user id, so a bot-filtered listing would
	/// miss them. Entries whose condition user is another bot are skipped.
	pub async fn unsubscribe_all(&self, bot_id: &str, broadcaster_id: &str) -> Result<(), AppError> {
		let app = self.clients.app_client();
		let targets = self.list_bot_subscriptions(app.as_ref(), bot_id, broadcaster_id).await?;

		if targets.is_empty() {
			debug!(bot_id, broadcaster_id, "no subscriptions to delete");
			return Ok(());
		}

		let permits = Arc::new(Semaphore::new(self.settings.delete_concurrency.max(1)));
		let tasks: Vec<_> = targets
			.into_iter()
			.map(|sub| {
				let app = Arc::clone(&app);
				let permits = Arc::clone(&permits);
				tokio::spawn(async move {
					let _permit = permits
						.acquire_owned()
						.await
						.map_err(|_| AppError::internal("delete worker pool closed"))?;
					delete_subscription(app.as_ref(), &sub.id).await
				})
			})
			.collect();

		let mut errors = Vec::new();
		for joined in futures::future::join_all(tasks).await {
			match joined {
				Ok(Ok(())) => {}
				Ok(Err(e)) => errors.push(e),
				Err(e) => errors.push(AppError::internal(format!("delete task failed: {e}"))),
			}
		}

		match AppError::join(errors) {
			None => {
				info!(bot_id, broadcaster_id, "eventsub subscriptions removed");
				Ok(())
			}
			Some(err) => {
				warn!(bot_id, broadcaster_id, failures = err.failure_count(), "unsubscribe_all partially failed");
				Err(err)
			}
		}
	}

	pub async fn unsubscribe(&self, subscription_id: &str) -> Result<(), AppError> {
		delete_subscription(self.clients.app_client().as_ref(), subscription_id).await
	}

	/// Walk the paginated listing, keeping subscriptions for this bot/broadcaster pair.
	///
	/// The listing is filtered upstream by the broadcaster id, which matches any user id
	/// in a condition, so bot-less stream.* subscriptions are included.
	async fn list_bot_subscriptions(
		&self,
		app: &dyn HelixApi,
		bot_id: &str,
		broadcaster_id: &str,
	) -> Result<Vec<HelixSubscription>, AppError> {
		let mut out = Vec::new();
		let mut cursor: Option<String> = None;

		loop {
			let page = match app.list_eventsub_subscriptions(Some(broadcaster_id), cursor.as_deref()).await {
				Ok(resp) if resp.is_success() => resp.data,
				Ok(resp) => {
					warn!(bot_id, broadcaster_id, upstream = %resp.describe(), "eventsub listing rejected");
					return Err(AppError::upstream(format!(
						"list subscriptions for broadcaster {broadcaster_id} rejected with status {}",
						resp.status
					)));
				}
				Err(e) => {
					warn!(bot_id, broadcaster_id, error = ?e, "eventsub listing failed");
					return Err(AppError::upstream(format!(
						"list subscriptions for broadcaster {broadcaster_id} failed"
					)));
				}
			};

			if page.data.is_empty() {
				break;
			}

			out.extend(page.data.into_iter().filter(|s| {
				s.condition.broadcaster_user_id.as_deref() == Some(broadcaster_id)
					&& s.condition.user_id.as_deref().is_none_or(|u| u == bot_id)
			}));

			match page.cursor {
				Some(next) if !next.is_empty() => cursor = Some(next),
				_ => break,
			}
		}

		Ok(out)
	}
}

async fn delete_subscription(app: &dyn HelixApi, subscription_id: &str) -> Result<(), AppError> {
	metrics::counter!("tether_eventsub_delete_total").increment(1);

	match app.delete_eventsub_subscription(subscription_id).await {
		Ok(resp) if resp.is_success() => {
			debug!(subscription_id, "eventsub subscription deleted");
			Ok(())
		}
		Ok(resp) => {
			warn!(subscription_id, upstream = %resp.describe(), "eventsub delete rejected");
			Err(AppError::upstream(format!(
				"delete subscription {subscription_id} rejected with status {}",
				resp.status
			)))
		}
		Err(e) => {
			warn!(subscription_id, error = ?e, "eventsub delete failed");
			Err(AppError::upstream(format!("delete subscription {subscription_id} failed")))
		}
	}
}
