#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::{Platform, UserId};

/// Chatter standing in a channel, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatterRole {
	Pleb,
	Subscriber,
	Vip,
	Moderator,
	Broadcaster,
}

impl ChatterRole {
	/// Highest role implied by a set of badge set ids.
	pub fn from_badge_sets<'a>(set_ids: impl IntoIterator<Item = &'a str>) -> Self {
		set_ids
			.into_iter()
			.filter_map(|set_id| match set_id {
				"subscriber" => Some(ChatterRole::Subscriber),
				"vip" => Some(ChatterRole::Vip),
				"moderator" => Some(ChatterRole::Moderator),
				"broadcaster" => Some(ChatterRole::Broadcaster),
				_ => None,
			})
			.max()
			.unwrap_or(ChatterRole::Pleb)
	}
}

/// Chat message observed in a channel served by one of our bots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageEvent {
	pub platform: Platform,
	pub user_id: UserId,
	pub bot_id: String,
	pub broadcaster_id: String,
	pub broadcaster_login: String,
	pub broadcaster_name: String,
	pub message_id: String,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reply_to: Option<String>,
	pub chatter_id: String,
	pub chatter_login: String,
	pub chatter_name: String,
	pub chatter_role: ChatterRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
	Online,
	Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatusEvent {
	pub platform: Platform,
	pub status: StreamStatus,
	pub user_id: UserId,
	pub bot_id: String,
	pub broadcaster_id: String,
	pub broadcaster_login: String,
	/// RFC3339 start time, online events only.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub started_at: Option<String>,
}
