#![forbid(unsafe_code)]

use std::sync::Arc;

use tether_domain::AppError;
use tether_platform::twitch::ClientCache;
use tether_platform::twitch::helix::SendChatMessage;
use tether_protocol::messages::ChatMessageSend;
use tracing::{debug, warn};

use crate::rpc::RequestContext;

/// Posts chat messages as a bot through the app client.
pub struct ChatService {
	clients: Arc<ClientCache>,
}

impl ChatService {
	pub fn new(clients: Arc<ClientCache>) -> Self {
		Self { clients }
	}

	pub async fn send(&self, ctx: &RequestContext, msg: &ChatMessageSend) -> Result<(), AppError> {
		let req = SendChatMessage {
			broadcaster_id: msg.broadcaster_id.clone(),
			sender_id: msg.bot_id.clone(),
			message: msg.message.clone(),
			reply_parent_message_id: msg.reply_to.clone().filter(|id| !id.is_empty()),
		};

		match self.clients.app_client().send_chat_message(&req).await {
			Ok(resp) if resp.is_success() && resp.data => {
				debug!(trace_id = %ctx.trace_id, bot_id = %msg.bot_id, broadcaster_id = %msg.broadcaster_id, "chat message sent");
				Ok(())
			}
			Ok(resp) => {
				warn!(
					trace_id = %ctx.trace_id,
					bot_id = %msg.bot_id,
					broadcaster_id = %msg.broadcaster_id,
					reply_to = ?msg.reply_to,
					upstream = %resp.describe(),
					"chat message not sent"
				);
				Err(AppError::upstream(format!(
					"send chat message to broadcaster {} rejected",
					msg.broadcaster_id
				)))
			}
			Err(e) => {
				warn!(
					trace_id = %ctx.trace_id,
					bot_id = %msg.bot_id,
					broadcaster_id = %msg.broadcaster_id,
					error = ?e,
					"chat message request failed"
				);
				Err(AppError::upstream(format!(
					"send chat message to broadcaster {} failed",
					msg.broadcaster_id
				)))
			}
		}
	}
}
