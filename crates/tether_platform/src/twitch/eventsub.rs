#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use tether_domain::ChatterRole;

use super::helix::EventSubCondition;

/// Invisible tag character Twitch appends to repeated messages to dodge duplicate filters.
const TAG_SPACE: char = '\u{E0000}';

/// EventSub subscription types a bot holds for the channel it serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventSubType {
	ChannelChatMessage,
	StreamOnline,
	StreamOffline,
}

impl EventSubType {
	/// Subscription set created for every started bot, in creation order.
	pub const BOT_DEFAULTS: [EventSubType; 3] = [
		EventSubType::ChannelChatMessage,
		EventSubType::StreamOnline,
		EventSubType::StreamOffline,
	];

	pub const fn as_str(self) -> &'static str {
		match self {
			EventSubType::ChannelChatMessage => "channel.chat.message",
			EventSubType::StreamOnline => "stream.online",
			EventSubType::StreamOffline => "stream.offline",
		}
	}

	pub const fn version(self) -> &'static str {
		"1"
	}

	/// Condition object for this type. Only chat messages are scoped to the reading user.
	pub fn condition(self, broadcaster_id: &str, user_id: &str) -> EventSubCondition {
		match self {
			EventSubType::ChannelChatMessage => EventSubCondition {
				broadcaster_user_id: Some(broadcaster_id.to_string()),
				user_id: Some(user_id.to_string()),
			},
			EventSubType::StreamOnline | EventSubType::StreamOffline => EventSubCondition {
				broadcaster_user_id: Some(broadcaster_id.to_string()),
				user_id: None,
			},
		}
	}
}

impl fmt::Display for EventSubType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for EventSubType {
	type Err = anyhow::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim() {
			"channel.chat.message" => Ok(EventSubType::ChannelChatMessage),
			"stream.online" => Ok(EventSubType::StreamOnline),
			"stream.offline" => Ok(EventSubType::StreamOffline),
			other => anyhow::bail!("unsupported eventsub type: {other}"),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelChatMessageEvent {
	pub broadcaster_user_id: String,
	pub broadcaster_user_login: String,
	pub broadcaster_user_name: String,

	pub chatter_user_id: String,
	pub chatter_user_login: String,
	pub chatter_user_name: String,

	pub message_id: String,
	pub message: ChatMessageContent,
	#[serde(default)]
	pub badges: Vec<ChatBadge>,
	#[serde(default)]
	pub reply: Option<ChatReply>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessageContent {
	pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatBadge {
	pub set_id: String,
	#[serde(default)]
	pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatReply {
	pub parent_message_id: String,
}

impl ChannelChatMessageEvent {
	/// Message text without the first tag character Twitch may have injected.
	pub fn clean_text(&self) -> String {
		strip_tag_space(&self.message.text)
	}

	pub fn chatter_role(&self) -> ChatterRole {
		ChatterRole::from_badge_sets(self.badges.iter().map(|b| b.set_id.as_str()))
	}

	pub fn reply_to(&self) -> Option<&str> {
		self.reply.as_ref().map(|r| r.parent_message_id.as_str())
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamOnlineEvent {
	pub broadcaster_user_id: String,
	pub broadcaster_user_login: String,
	#[serde(default)]
	pub broadcaster_user_name: String,
	#[serde(default, rename = "type")]
	pub kind: String,
	pub started_at: String,
}

impl StreamOnlineEvent {
	/// `started_at` normalized to RFC3339 with second precision.
	pub fn started_at_rfc3339(&self) -> anyhow::Result<String> {
		let ts = DateTime::parse_from_rfc3339(&self.started_at)
			.with_context(|| format!("parse stream.online started_at {:?}", self.started_at))?;
		Ok(ts.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Secs, true))
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamOfflineEvent {
	pub broadcaster_user_id: String,
	pub broadcaster_user_login: String,
	#[serde(default)]
	pub broadcaster_user_name: String,
}

/// Decoded EventSub notification body.
#[derive(Debug, Clone)]
pub enum TwitchNotification {
	ChatMessage(ChannelChatMessageEvent),
	StreamOnline(StreamOnlineEvent),
	StreamOffline(StreamOfflineEvent),
}

impl TwitchNotification {
	/// Decode the `event` object for `subscription_type`. `Ok(None)` for types we do not relay.
	pub fn parse(subscription_type: &str, event: serde_json::Value) -> anyhow::Result<Option<Self>> {
		let Ok(ty) = subscription_type.parse::<EventSubType>() else {
			return Ok(None);
		};

		let notification = match ty {
			EventSubType::ChannelChatMessage => {
				TwitchNotification::ChatMessage(serde_json::from_value(event).context("decode channel.chat.message")?)
			}
			EventSubType::StreamOnline => {
				TwitchNotification::StreamOnline(serde_json::from_value(event).context("decode stream.online")?)
			}
			EventSubType::StreamOffline => {
				TwitchNotification::StreamOffline(serde_json::from_value(event).context("decode stream.offline")?)
			}
		};

		Ok(Some(notification))
	}

	pub fn broadcaster_id(&self) -> &str {
		match self {
			TwitchNotification::ChatMessage(e) => &e.broadcaster_user_id,
			TwitchNotification::StreamOnline(e) => &e.broadcaster_user_id,
			TwitchNotification::StreamOffline(e) => &e.broadcaster_user_id,
		}
	}

	pub fn event_type(&self) -> EventSubType {
		match self {
			TwitchNotification::ChatMessage(_) => EventSubType::ChannelChatMessage,
			TwitchNotification::StreamOnline(_) => EventSubType::StreamOnline,
			TwitchNotification::StreamOffline(_) => EventSubType::StreamOffline,
		}
	}
}

fn strip_tag_space(text: &str) -> String {
	match text.find(TAG_SPACE) {
		Some(idx) => {
			let mut out = String::with_capacity(text.len());
			out.push_str(&text[..idx]);
			out.push_str(&text[idx + TAG_SPACE.len_utf8()..]);
			out
		}
		None => text.to_string(),
	}
}
