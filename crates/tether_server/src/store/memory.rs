#![forbid(unsafe_code)]

use std::collections::HashMap;

use parking_lot::Mutex;
use tether_domain::{AppError, BotFilter, BotSelection, DefaultBot, NewPlatformBot, PlatformBot, UserId};

use super::BotStore;

#[derive(Default)]
struct State {
	bots: Vec<PlatformBot>,
	selections: HashMap<UserId, BotSelection>,
	default_bot: Option<DefaultBot>,
}

impl State {
	fn select(&mut self, user_id: UserId, bot_id: &str) -> Result<BotSelection, AppError> {
		let bot = self
			.bots
			.iter()
			.find(|b| b.user_id == user_id && b.bot_id == bot_id)
			.ok_or_else(|| AppError::not_found(format!("bot {bot_id} is not assigned to user {user_id}")))?;

		let enabled = self.selections.get(&user_id).is_some_and(|s| s.enabled);
		let selection = BotSelection {
			user_id,
			bot_id: bot.bot_id.clone(),
			broadcaster_id: bot.broadcaster_id.clone(),
			enabled,
		};
		self.selections.insert(user_id, selection.clone());
		Ok(selection)
	}
}

/// Bot store kept in process memory, for development runs and tests.
#[derive(Default)]
pub struct InMemoryBotStore {
	state: Mutex<State>,
}

impl InMemoryBotStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_default_bot(bot_id: impl Into<String>) -> Self {
		let store = Self::default();
		store.state.lock().default_bot = Some(DefaultBot { bot_id: bot_id.into() });
		store
	}
}

#[async_trait::async_trait]
impl BotStore for InMemoryBotStore {
	async fn get_selected_bot(&self, user_id: UserId) -> Result<BotSelection, AppError> {
		self.state
			.lock()
			.selections
			.get(&user_id)
			.cloned()
			.ok_or_else(|| AppError::not_found(format!("no bot selected for user {user_id}")))
	}

	async fn get_selected_bot_by_broadcaster(&self, broadcaster_id: &str) -> Result<BotSelection, AppError> {
		self.state
			.lock()
			.selections
			.values()
			.find(|s| s.broadcaster_id == broadcaster_id)
			.cloned()
			.ok_or_else(|| AppError::not_found(format!("no bot selected for broadcaster {broadcaster_id}")))
	}

	async fn list_bots(&self, filter: &BotFilter) -> Result<Vec<PlatformBot>, AppError> {
		Ok(self.state.lock().bots.iter().filter(|b| filter.matches(b)).cloned().collect())
	}

	async fn create_bot(&self, bot: NewPlatformBot) -> Result<PlatformBot, AppError> {
		let row = PlatformBot {
			user_id: bot.user_id,
			bot_id: bot.bot_id,
			broadcaster_id: bot.broadcaster_id,
		};
		self.state.lock().bots.push(row.clone());
		Ok(row)
	}

	async fn change_selected_bot(&self, user_id: UserId, bot_id: &str) -> Result<BotSelection, AppError> {
		self.state.lock().select(user_id, bot_id)
	}

	async fn set_bot_enabled(&self, user_id: UserId, enabled: bool) -> Result<(), AppError> {
		let mut st = self.state.lock();
		let selection = st
			.selections
			.get_mut(&user_id)
			.ok_or_else(|| AppError::not_found(format!("no bot selected for user {user_id}")))?;
		selection.enabled = enabled;
		Ok(())
	}

	async fn get_default_bot(&self) -> Result<DefaultBot, AppError> {
		self.state
			.lock()
			.default_bot
			.clone()
			.ok_or_else(|| AppError::not_found("no default bot configured"))
	}

	async fn change_default_bot(&self, bot_id: &str) -> Result<(), AppError> {
		let mut st = self.state.lock();
		let Some(default_bot) = st.default_bot.as_mut() else {
			return Err(AppError::internal("default bot row missing"));
		};
		default_bot.bot_id = bot_id.to_string();
		Ok(())
	}

	async fn select_default_for_user(&self, user_id: UserId, broadcaster_id: &str) -> Result<BotSelection, AppError> {
		let mut st = self.state.lock();

		let bot_id = match st.bots.iter().find(|b| b.user_id == user_id) {
			Some(existing) => existing.bot_id.clone(),
			None => {
				let default_bot = st
					.default_bot
					.clone()
					.ok_or_else(|| AppError::not_found("no default bot configured"))?;
				st.bots.push(PlatformBot {
					user_id,
					bot_id: default_bot.bot_id.clone(),
					broadcaster_id: broadcaster_id.to_string(),
				});
				default_bot.bot_id
			}
		};

		st.select(user_id, &bot_id)
	}
}
