#![forbid(unsafe_code)]

use anyhow::Context;
use tether_domain::{AppError, BotFilter, BotSelection, DefaultBot, NewPlatformBot, Platform, PlatformBot, UserId};
use tracing::warn;
use uuid::Uuid;

use super::BotStore;

type SelectionRow = (Uuid, String, String, bool);
type BotRow = (Uuid, String, String);

fn selection_from_row((user_id, bot_id, broadcaster_id, enabled): SelectionRow) -> BotSelection {
	BotSelection {
		user_id: UserId(user_id),
		bot_id,
		broadcaster_id,
		enabled,
	}
}

fn bot_from_row((user_id, bot_id, broadcaster_id): BotRow) -> PlatformBot {
	PlatformBot {
		user_id: UserId(user_id),
		bot_id,
		broadcaster_id,
	}
}

/// Log the full chain and hand back an opaque internal error.
fn internal(op: &'static str, e: anyhow::Error) -> AppError {
	warn!(op, error = ?e, "bot store query failed");
	AppError::internal(format!("bot store: {op} failed"))
}

/// Bot store over tables managed outside this service
/// (`platform_bots`, `selected_bots`, `default_bots`), scoped by platform.
pub struct PgBotStore {
	pool: sqlx::PgPool,
	platform: Platform,
}

impl PgBotStore {
	pub async fn connect(database_url: &str, platform: Platform) -> anyhow::Result<Self> {
		let pool = sqlx::PgPool::connect(database_url).await.context("connect postgres")?;
		Ok(Self { pool, platform })
	}

	pub fn from_pool(pool: sqlx::PgPool, platform: Platform) -> Self {
		Self { pool, platform }
	}

	async fn fetch_selection(&self, user_id: UserId) -> anyhow::Result<Option<BotSelection>> {
		let row: Option<SelectionRow> = sqlx::query_as(
			"SELECT user_id, bot_id, broadcaster_id, enabled FROM selected_bots WHERE platform = $1 AND user_id = $2",
		)
		.bind(self.platform.as_str())
		.bind(user_id.0)
		.fetch_optional(&self.pool)
		.await
		.context("select selected bot")?;
		Ok(row.map(selection_from_row))
	}
}

#[async_trait::async_trait]
impl BotStore for PgBotStore {
	async fn get_selected_bot(&self, user_id: UserId) -> Result<BotSelection, AppError> {
		self.fetch_selection(user_id)
			.await
			.map_err(|e| internal("get_selected_bot", e))?
			.ok_or_else(|| AppError::not_found(format!("no bot selected for user {user_id}")))
	}

	async fn get_selected_bot_by_broadcaster(&self, broadcaster_id: &str) -> Result<BotSelection, AppError> {
		let row: Option<SelectionRow> = sqlx::query_as(
			"SELECT user_id, bot_id, broadcaster_id, enabled FROM selected_bots \
			WHERE platform = $1 AND broadcaster_id = $2 LIMIT 1",
		)
		.bind(self.platform.as_str())
		.bind(broadcaster_id)
		.fetch_optional(&self.pool)
		.await
		.context("select selected bot by broadcaster")
		.map_err(|e| internal("get_selected_bot_by_broadcaster", e))?;

		row.map(selection_from_row)
			.ok_or_else(|| AppError::not_found(format!("no bot selected for broadcaster {broadcaster_id}")))
	}

	async fn list_bots(&self, filter: &BotFilter) -> Result<Vec<PlatformBot>, AppError> {
		let rows: Vec<BotRow> = sqlx::query_as(
			"SELECT user_id, bot_id, broadcaster_id FROM platform_bots \
			WHERE platform = $1 \
			AND ($2::uuid IS NULL OR user_id = $2) \
			AND ($3::text IS NULL OR bot_id = $3) \
			AND ($4::text IS NULL OR broadcaster_id = $4) \
			ORDER BY created_at",
		)
		.bind(self.platform.as_str())
		.bind(filter.user_id.map(|u| u.0))
		.bind(filter.bot_id.as_deref())
		.bind(filter.broadcaster_id.as_deref())
		.fetch_all(&self.pool)
		.await
		.context("list platform bots")
		.map_err(|e| internal("list_bots", e))?;

		Ok(rows.into_iter().map(bot_from_row).collect())
	}

	async fn create_bot(&self, bot: NewPlatformBot) -> Result<PlatformBot, AppError> {
		sqlx::query("INSERT INTO platform_bots (platform, user_id, bot_id, broadcaster_id) VALUES ($1, $2, $3, $4)")
			.bind(self.platform.as_str())
			.bind(bot.user_id.0)
			.bind(&bot.bot_id)
			.bind(&bot.broadcaster_id)
			.execute(&self.pool)
			.await
			.context("insert platform bot")
			.map_err(|e| internal("create_bot", e))?;

		Ok(PlatformBot {
			user_id: bot.user_id,
			bot_id: bot.bot_id,
			broadcaster_id: bot.broadcaster_id,
		})
	}

	async fn change_selected_bot(&self, user_id: UserId, bot_id: &str) -> Result<BotSelection, AppError> {
		let mut tx = self
			.pool
			.begin()
			.await
			.context("begin postgres tx")
			.map_err(|e| internal("change_selected_bot", e))?;

		let bot: Option<BotRow> = sqlx::query_as(
			"SELECT user_id, bot_id, broadcaster_id FROM platform_bots \
			WHERE platform = $1 AND user_id = $2 AND bot_id = $3 LIMIT 1",
		)
		.bind(self.platform.as_str())
		.bind(user_id.0)
		.bind(bot_id)
		.fetch_optional(&mut *tx)
		.await
		.context("select assigned bot")
		.map_err(|e| internal("change_selected_bot", e))?;

		let Some((_, bot_id, broadcaster_id)) = bot else {
			return Err(AppError::not_found(format!("bot {bot_id} is not assigned to user {user_id}")));
		};

		let row: SelectionRow = sqlx::query_as(
			"INSERT INTO selected_bots (platform, user_id, bot_id, broadcaster_id, enabled) VALUES ($1, $2, $3, $4, FALSE) \
			ON CONFLICT (platform, user_id) DO UPDATE SET bot_id = EXCLUDED.bot_id, broadcaster_id = EXCLUDED.broadcaster_id \
			RETURNING user_id, bot_id, broadcaster_id, enabled",
		)
		.bind(self.platform.as_str())
		.bind(user_id.0)
		.bind(&bot_id)
		.bind(&broadcaster_id)
		.fetch_one(&mut *tx)
		.await
		.context("upsert selected bot")
		.map_err(|e| internal("change_selected_bot", e))?;

		tx.commit()
			.await
			.context("commit postgres tx")
			.map_err(|e| internal("change_selected_bot", e))?;

		Ok(selection_from_row(row))
	}

	async fn set_bot_enabled(&self, user_id: UserId, enabled: bool) -> Result<(), AppError> {
		let result = sqlx::query("UPDATE selected_bots SET enabled = $1 WHERE platform = $2 AND user_id = $3")
			.bind(enabled)
			.bind(self.platform.as_str())
			.bind(user_id.0)
			.execute(&self.pool)
			.await
			.context("update selected bot enabled")
			.map_err(|e| internal("set_bot_enabled", e))?;

		if result.rows_affected() == 0 {
			return Err(AppError::not_found(format!("no bot selected for user {user_id}")));
		}
		Ok(())
	}

	async fn get_default_bot(&self) -> Result<DefaultBot, AppError> {
		let row: Option<(String,)> = sqlx::query_as("SELECT bot_id FROM default_bots WHERE platform = $1")
			.bind(self.platform.as_str())
			.fetch_optional(&self.pool)
			.await
			.context("select default bot")
			.map_err(|e| internal("get_default_bot", e))?;

		row.map(|(bot_id,)| DefaultBot { bot_id })
			.ok_or_else(|| AppError::not_found(format!("no default {} bot configured", self.platform)))
	}

	async fn change_default_bot(&self, bot_id: &str) -> Result<(), AppError> {
		let result = sqlx::query("UPDATE default_bots SET bot_id = $1 WHERE platform = $2")
			.bind(bot_id)
			.bind(self.platform.as_str())
			.execute(&self.pool)
			.await
			.context("update default bot")
			.map_err(|e| internal("change_default_bot", e))?;

		if result.rows_affected() == 0 {
			return Err(AppError::internal(format!("no default {} bot row to update", self.platform)));
		}
		Ok(())
	}

	async fn select_default_for_user(&self, user_id: UserId, broadcaster_id: &str) -> Result<BotSelection, AppError> {
		let op = "select_default_for_user";
		let platform = self.platform.as_str();
		let mut tx = self
			.pool
			.begin()
			.await
			.context("begin postgres tx")
			.map_err(|e| internal(op, e))?;

		let assigned: Option<BotRow> = sqlx::query_as(
			"SELECT user_id, bot_id, broadcaster_id FROM platform_bots \
			WHERE platform = $1 AND user_id = $2 ORDER BY created_at LIMIT 1",
		)
		.bind(platform)
		.bind(user_id.0)
		.fetch_optional(&mut *tx)
		.await
		.context("select first assigned bot")
		.map_err(|e| internal(op, e))?;

		let (bot_id, broadcaster_id) = match assigned {
			Some((_, bot_id, broadcaster_id)) => (bot_id, broadcaster_id),
			None => {
				let default_bot: Option<(String,)> =
					sqlx::query_as("SELECT bot_id FROM default_bots WHERE platform = $1 FOR SHARE")
						.bind(platform)
						.fetch_optional(&mut *tx)
						.await
						.context("select default bot")
						.map_err(|e| internal(op, e))?;
				let Some((bot_id,)) = default_bot else {
					return Err(AppError::not_found(format!("no default {} bot configured", self.platform)));
				};

				sqlx::query("INSERT INTO platform_bots (platform, user_id, bot_id, broadcaster_id) VALUES ($1, $2, $3, $4)")
					.bind(platform)
					.bind(user_id.0)
					.bind(&bot_id)
					.bind(broadcaster_id)
					.execute(&mut *tx)
					.await
					.context("assign default bot")
					.map_err(|e| internal(op, e))?;

				(bot_id, broadcaster_id.to_string())
			}
		};

		let row: SelectionRow = sqlx::query_as(
			"INSERT INTO selected_bots (platform, user_id, bot_id, broadcaster_id, enabled) VALUES ($1, $2, $3, $4, FALSE) \
			ON CONFLICT (platform, user_id) DO UPDATE SET bot_id = EXCLUDED.bot_id, broadcaster_id = EXCLUDED.broadcaster_id \
			RETURNING user_id, bot_id, broadcaster_id, enabled",
		)
		.bind(platform)
		.bind(user_id.0)
		.bind(&bot_id)
		.bind(&broadcaster_id)
		.fetch_one(&mut *tx)
		.await
		.context("insert selected bot")
		.map_err(|e| internal(op, e))?;

		tx.commit().await.context("commit postgres tx").map_err(|e| internal(op, e))?;
		Ok(selection_from_row(row))
	}
}
