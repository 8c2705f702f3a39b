#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::{Platform, UserId};

/// The bot currently selected by a user, and the channel it serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotSelection {
	pub user_id: UserId,
	pub bot_id: String,
	pub broadcaster_id: String,
	pub enabled: bool,
}

/// A bot identity assigned to a user's channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformBot {
	pub user_id: UserId,
	pub bot_id: String,
	pub broadcaster_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPlatformBot {
	pub user_id: UserId,
	pub bot_id: String,
	pub broadcaster_id: String,
}

/// Platform-wide default bot identity, handed to users without their own bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultBot {
	pub bot_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BotFilter {
	pub user_id: Option<UserId>,
	pub bot_id: Option<String>,
	pub broadcaster_id: Option<String>,
}

impl BotFilter {
	pub fn by_user(user_id: UserId) -> Self {
		Self {
			user_id: Some(user_id),
			..Self::default()
		}
	}

	pub fn matches(&self, bot: &PlatformBot) -> bool {
		self.user_id.is_none_or(|u| u == bot.user_id)
			&& self.bot_id.as_deref().is_none_or(|b| b == bot.bot_id)
			&& self.broadcaster_id.as_deref().is_none_or(|b| b == bot.broadcaster_id)
	}
}

/// Bot state returned to callers of the bot query RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotView {
	pub platform: Platform,
	pub bot_id: String,
	pub user_id: UserId,
	pub broadcaster_id: String,
	pub enabled: bool,
}

impl BotView {
	pub fn from_selection(platform: Platform, selection: &BotSelection) -> Self {
		Self {
			platform,
			bot_id: selection.bot_id.clone(),
			user_id: selection.user_id,
			broadcaster_id: selection.broadcaster_id.clone(),
			enabled: selection.enabled,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn filter_matches_on_set_fields_only() {
		let user = UserId::new_v4();
		let bot = PlatformBot {
			user_id: user,
			bot_id: "bot-1".to_string(),
			broadcaster_id: "b-1".to_string(),
		};

		assert!(BotFilter::default().matches(&bot));
		assert!(BotFilter::by_user(user).matches(&bot));
		assert!(!BotFilter::by_user(UserId::new_v4()).matches(&bot));

		let filter = BotFilter {
			broadcaster_id: Some("b-2".to_string()),
			..BotFilter::by_user(user)
		};
		assert!(!filter.matches(&bot));
	}

	#[test]
	fn bot_view_uses_camel_case_on_the_wire() {
		let view = BotView {
			platform: Platform::Twitch,
			bot_id: "bot".to_string(),
			user_id: UserId::new_v4(),
			broadcaster_id: "b".to_string(),
			enabled: true,
		};
		let json = serde_json::to_value(&view).unwrap();
		assert_eq!(json["platform"], "twitch");
		assert_eq!(json["botId"], "bot");
		assert_eq!(json["broadcasterId"], "b");
	}
}
