#![forbid(unsafe_code)]

//! Bot selection state, per user and platform.

mod memory;
mod postgres;

use tether_domain::{AppError, BotFilter, BotSelection, DefaultBot, NewPlatformBot, PlatformBot, UserId};

pub use memory::InMemoryBotStore;
pub use postgres::PgBotStore;

#[async_trait::async_trait]
pub trait BotStore: Send + Sync + 'static {
	/// `NotFound` when the user never activated a bot.
	async fn get_selected_bot(&self, user_id: UserId) -> Result<BotSelection, AppError>;

	async fn get_selected_bot_by_broadcaster(&self, broadcaster_id: &str) -> Result<BotSelection, AppError>;

	async fn list_bots(&self, filter: &BotFilter) -> Result<Vec<PlatformBot>, AppError>;

	async fn create_bot(&self, bot: NewPlatformBot) -> Result<PlatformBot, AppError>;

	/// Point the user's selection at one of their assigned bots, keeping the enabled flag.
	async fn change_selected_bot(&self, user_id: UserId, bot_id: &str) -> Result<BotSelection, AppError>;

	async fn set_bot_enabled(&self, user_id: UserId, enabled: bool) -> Result<(), AppError>;

	async fn get_default_bot(&self) -> Result<DefaultBot, AppError>;

	/// Fails with `Internal` when no default bot row exists to update.
	async fn change_default_bot(&self, bot_id: &str) -> Result<(), AppError>;

	/// First activation, as one unit: select the user's first assigned bot, or assign the
	/// default bot to `broadcaster_id` and select that.
	async fn select_default_for_user(&self, user_id: UserId, broadcaster_id: &str) -> Result<BotSelection, AppError>;
}
