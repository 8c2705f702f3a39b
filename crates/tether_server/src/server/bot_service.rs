#![forbid(unsafe_code)]

use std::sync::Arc;

use tether_domain::{AppError, BotSelection, BotView, Platform, UserId};
use tether_platform::CredentialStore;
use tether_platform::twitch::SubscriptionOrchestrator;
use tether_protocol::messages::ChatMessageSend;
use tracing::{debug, info, warn};

use super::chat::ChatService;
use crate::rpc::RequestContext;
use crate::store::BotStore;

/// Message the bot posts into a channel right after it starts.
pub const DEFAULT_GREETING: &str = "hi!";

/// Tenant bot lifecycle: activation, deactivation and state queries.
pub struct BotService {
	platform: Platform,
	bots: Arc<dyn BotStore>,
	credentials: Arc<dyn CredentialStore>,
	subscriptions: Arc<SubscriptionOrchestrator>,
	chat: Arc<ChatService>,
	greeting: Option<String>,
}

impl BotService {
	pub fn new(
		platform: Platform,
		bots: Arc<dyn BotStore>,
		credentials: Arc<dyn CredentialStore>,
		subscriptions: Arc<SubscriptionOrchestrator>,
		chat: Arc<ChatService>,
		greeting: Option<String>,
	) -> Self {
		Self {
			platform,
			bots,
			credentials,
			subscriptions,
			chat,
			greeting: greeting.filter(|g| !g.trim().is_empty()),
		}
	}

	/// Selection for `user_id`, creating it from the user's first bot (or the default bot)
	/// on first activation.
	async fn selection_or_default(&self, ctx: &RequestContext, user_id: UserId) -> Result<BotSelection, AppError> {
		match self.bots.get_selected_bot(user_id).await {
			Ok(selection) => Ok(selection),
			Err(e) if e.is_not_found() => {
				let credential = self
					.credentials
					.get_by_user_and_platform(&ctx.trace_id, user_id, self.platform)
					.await?;
				let selection = self.bots.select_default_for_user(user_id, &credential.account_id).await?;
				info!(
					trace_id = %ctx.trace_id,
					%user_id,
					bot_id = %selection.bot_id,
					broadcaster_id = %selection.broadcaster_id,
					"bot selected on first activation"
				);
				Ok(selection)
			}
			Err(e) => Err(e),
		}
	}

	/// Subscribe the selected bot to its broadcaster and enable it.
	///
	/// The selection is committed before any upstream call and stays in place when the
	/// upstream step fails.
	pub async fn start_bot(&self, ctx: &RequestContext, user_id: UserId) -> Result<(), AppError> {
		let selection = self.selection_or_default(ctx, user_id).await?;

		self.subscriptions
			.subscribe_all(&selection.bot_id, &selection.broadcaster_id)
			.await?;
		self.bots.set_bot_enabled(user_id, true).await?;

		info!(
			trace_id = %ctx.trace_id,
			%user_id,
			bot_id = %selection.bot_id,
			broadcaster_id = %selection.broadcaster_id,
			"bot started"
		);

		if let Some(greeting) = self.greeting.as_deref() {
			self.greet(ctx, &selection, greeting).await;
		}
		Ok(())
	}

	pub async fn stop_bot(&self, ctx: &RequestContext, user_id: UserId) -> Result<(), AppError> {
		let selection = self.bots.get_selected_bot(user_id).await?;

		self.subscriptions
			.unsubscribe_all(&selection.bot_id, &selection.broadcaster_id)
			.await?;
		self.bots.set_bot_enabled(user_id, false).await?;

		info!(
			trace_id = %ctx.trace_id,
			%user_id,
			bot_id = %selection.bot_id,
			broadcaster_id = %selection.broadcaster_id,
			"bot stopped"
		);
		Ok(())
	}

	pub async fn get_bot(&self, ctx: &RequestContext, user_id: UserId) -> Result<BotView, AppError> {
		let selection = self.bots.get_selected_bot(user_id).await.inspect_err(|e| {
			debug!(trace_id = %ctx.trace_id, %user_id, code = %e.code, "no selected bot");
		})?;
		Ok(BotView::from_selection(self.platform, &selection))
	}

	pub async fn set_bot_enabled(&self, user_id: UserId, enabled: bool) -> Result<(), AppError> {
		self.bots.set_bot_enabled(user_id, enabled).await
	}

	pub async fn change_default_bot(&self, bot_id: &str) -> Result<(), AppError> {
		self.bots.change_default_bot(bot_id).await.inspect_err(|e| {
			warn!(bot_id, code = %e.code, error = %e.message, "default bot not changed");
		})
	}

	async fn greet(&self, ctx: &RequestContext, selection: &BotSelection, greeting: &str) {
		let msg = ChatMessageSend {
			bot_id: selection.bot_id.clone(),
			broadcaster_id: selection.broadcaster_id.clone(),
			message: greeting.to_string(),
			reply_to: None,
		};
		if let Err(e) = self.chat.send(ctx, &msg).await {
			debug!(trace_id = %ctx.trace_id, code = %e.code, "greeting skipped");
		}
	}
}
