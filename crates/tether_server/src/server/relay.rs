#![forbid(unsafe_code)]

use std::sync::Arc;

use tether_domain::{AppError, BotSelection, ChatMessageEvent, Platform, StreamStatus, StreamStatusEvent};
use tether_platform::twitch::TwitchNotification;
use tether_platform::twitch::eventsub::{ChannelChatMessageEvent, StreamOfflineEvent, StreamOnlineEvent};
use tether_protocol::Topic;
use tether_protocol::messages::WebhookNotification;
use tracing::{debug, info, warn};

use crate::bus::MessageBus;
use crate::rpc::{self, RequestContext};
use crate::store::BotStore;

/// Turns verified EventSub notifications into platform-neutral events for the broadcaster's bot.
///
/// Notifications that cannot be decoded or matched to a selected bot are logged and dropped.
pub struct EventRelay {
	platform: Platform,
	bots: Arc<dyn BotStore>,
	bus: Arc<dyn MessageBus>,
}

impl EventRelay {
	pub fn new(platform: Platform, bots: Arc<dyn BotStore>, bus: Arc<dyn MessageBus>) -> Self {
		Self { platform, bots, bus }
	}

	pub async fn handle(&self, ctx: &RequestContext, notification: WebhookNotification) -> Result<(), AppError> {
		let subscription_type = notification.subscription_type;
		let parsed = match TwitchNotification::parse(&subscription_type, notification.event) {
			Ok(Some(parsed)) => parsed,
			Ok(None) => {
				debug!(trace_id = %ctx.trace_id, %subscription_type, "ignoring unsupported notification type");
				return Ok(());
			}
			Err(e) => {
				warn!(trace_id = %ctx.trace_id, %subscription_type, message_id = ?notification.message_id, error = ?e, "dropping undecodable notification");
				return Ok(());
			}
		};

		let broadcaster_id = parsed.broadcaster_id().to_string();
		let selection = match self.bots.get_selected_bot_by_broadcaster(&broadcaster_id).await {
			Ok(selection) => selection,
			Err(e) if e.is_not_found() => {
				warn!(trace_id = %ctx.trace_id, %subscription_type, %broadcaster_id, "no selected bot for broadcaster, dropping notification");
				return Ok(());
			}
			Err(e) => return Err(e),
		};

		match parsed {
			TwitchNotification::ChatMessage(event) => {
				let out = self.chat_message(&selection, event);
				self.emit(ctx, Topic::EventChatMessage, &broadcaster_id, &out).await
			}
			TwitchNotification::StreamOnline(event) => {
				let out = self.stream_online(ctx, &selection, event);
				self.emit(ctx, Topic::EventStreamOnline, &broadcaster_id, &out).await
			}
			TwitchNotification::StreamOffline(event) => {
				let out = self.stream_offline(&selection, event);
				self.emit(ctx, Topic::EventStreamOffline, &broadcaster_id, &out).await
			}
		}
	}

	fn chat_message(&self, selection: &BotSelection, event: ChannelChatMessageEvent) -> ChatMessageEvent {
		ChatMessageEvent {
			platform: self.platform,
			user_id: selection.user_id,
			bot_id: selection.bot_id.clone(),
			message: event.clean_text(),
			reply_to: event.reply_to().map(str::to_string),
			chatter_role: event.chatter_role(),
			broadcaster_id: event.broadcaster_user_id,
			broadcaster_login: event.broadcaster_user_login,
			broadcaster_name: event.broadcaster_user_name,
			message_id: event.message_id,
			chatter_id: event.chatter_user_id,
			chatter_login: event.chatter_user_login,
			chatter_name: event.chatter_user_name,
		}
	}

	fn stream_online(&self, ctx: &RequestContext, selection: &BotSelection, event: StreamOnlineEvent) -> StreamStatusEvent {
		let started_at = event
			.started_at_rfc3339()
			.inspect_err(|e| debug!(trace_id = %ctx.trace_id, raw = %event.started_at, error = %e, "unparsable stream start time"))
			.ok();

		StreamStatusEvent {
			platform: self.platform,
			status: StreamStatus::Online,
			user_id: selection.user_id,
			bot_id: selection.bot_id.clone(),
			broadcaster_id: event.broadcaster_user_id,
			broadcaster_login: event.broadcaster_user_login,
			started_at,
		}
	}

	fn stream_offline(&self, selection: &BotSelection, event: StreamOfflineEvent) -> StreamStatusEvent {
		StreamStatusEvent {
			platform: self.platform,
			status: StreamStatus::Offline,
			user_id: selection.user_id,
			bot_id: selection.bot_id.clone(),
			broadcaster_id: event.broadcaster_user_id,
			broadcaster_login: event.broadcaster_user_login,
			started_at: None,
		}
	}

	async fn emit<T>(&self, ctx: &RequestContext, topic: Topic, broadcaster_id: &str, event: &T) -> Result<(), AppError>
	where
		T: serde::Serialize + Sync,
	{
		let subject = topic
			.builder()
			.platform(self.platform)
			.entity(broadcaster_id)
			.build_subject()
			.map_err(|e| {
				warn!(trace_id = %ctx.trace_id, broadcaster_id, error = %e, "cannot build event subject");
				AppError::internal(format!("invalid event subject for broadcaster {broadcaster_id}"))
			})?;

		rpc::publish(self.bus.as_ref(), &subject, &ctx.trace_id, event)
			.await
			.map_err(|e| {
				warn!(trace_id = %ctx.trace_id, %subject, error = ?e, "failed to publish event");
				AppError::internal(format!("publish to {subject} failed"))
			})?;

		metrics::counter!("tether_events_relayed_total").increment(1);
		info!(trace_id = %ctx.trace_id, %subject, "event relayed");
		Ok(())
	}
}
