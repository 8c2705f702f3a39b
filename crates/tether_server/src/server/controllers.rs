#![forbid(unsafe_code)]

use std::sync::Arc;

use tether_domain::{AppError, Platform};
use tether_protocol::messages::{BotGet, BotToggle, ChatMessageSend, WebhookNotification};
use tether_protocol::{SubjectPattern, Topic};

use super::bot_service::BotService;
use super::chat::ChatService;
use super::relay::EventRelay;
use crate::rpc::Dispatcher;

/// Services reachable from the bus.
pub struct Controllers {
	pub platform: Platform,
	pub bots: Arc<BotService>,
	pub chat: Arc<ChatService>,
	pub relay: Arc<EventRelay>,
}

fn pattern(topic: Topic, platform: Platform) -> anyhow::Result<SubjectPattern> {
	let pattern = topic.builder().platform(platform).build_pattern()?;
	Ok(pattern)
}

impl Controllers {
	/// Register every handler with the dispatcher.
	pub async fn connect(&self, dispatcher: &Dispatcher) -> anyhow::Result<()> {
		let bots = Arc::clone(&self.bots);
		dispatcher
			.dispatch_request(pattern(Topic::PlatformStartBot, self.platform)?, move |ctx, req: BotToggle| {
				let bots = Arc::clone(&bots);
				async move {
					bots.start_bot(&ctx, req.user_id).await?;
					Ok::<_, AppError>(true)
				}
			})
			.await?;

		let bots = Arc::clone(&self.bots);
		dispatcher
			.dispatch_request(pattern(Topic::PlatformStopBot, self.platform)?, move |ctx, req: BotToggle| {
				let bots = Arc::clone(&bots);
				async move {
					bots.stop_bot(&ctx, req.user_id).await?;
					Ok::<_, AppError>(true)
				}
			})
			.await?;

		let bots = Arc::clone(&self.bots);
		dispatcher
			.dispatch_request(pattern(Topic::PlatformGetBot, self.platform)?, move |ctx, req: BotGet| {
				let bots = Arc::clone(&bots);
				async move { bots.get_bot(&ctx, req.user_id).await }
			})
			.await?;

		let chat = Arc::clone(&self.chat);
		dispatcher
			.dispatch_publish(
				pattern(Topic::PlatformChatMessageSend, self.platform)?,
				move |ctx, req: ChatMessageSend| {
					let chat = Arc::clone(&chat);
					async move { chat.send(&ctx, &req).await }
				},
			)
			.await?;

		let relay = Arc::clone(&self.relay);
		dispatcher
			.dispatch_publish(
				pattern(Topic::WebhookNotification, self.platform)?,
				move |ctx, req: WebhookNotification| {
					let relay = Arc::clone(&relay);
					async move { relay.handle(&ctx, req).await }
				},
			)
			.await?;

		Ok(())
	}
}
