#![forbid(unsafe_code)]

pub mod oauth;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use parking_lot::RwLock;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tether_domain::SecretString;
use tracing::{debug, info};
use url::Url;

use crate::{TokenPair, TokenRefreshHook};

const EVENTSUB_SUBSCRIPTIONS_PATH: &str = "/helix/eventsub/subscriptions";
const CHAT_MESSAGES_PATH: &str = "/helix/chat/messages";
const DEFAULT_API_BASE: &str = "https://api.twitch.tv";
const DEFAULT_OAUTH_BASE: &str = "https://id.twitch.tv";

fn retry_delay_from_headers(headers: &HeaderMap) -> Option<Duration> {
	if let Some(v) = headers.get(RETRY_AFTER)
		&& let Ok(s) = v.to_str()
		&& let Ok(secs) = s.trim().parse::<u64>()
	{
		return Some(Duration::from_secs(secs));
	}

	if let Some(v) = headers.get("Ratelimit-Reset")
		&& let Ok(s) = v.to_str()
		&& let Ok(reset_unix) = s.trim().parse::<u64>()
	{
		let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
		if reset_unix > now {
			return Some(Duration::from_secs(reset_unix - now));
		}
	}

	None
}

/// One retry on 429 (after the advertised delay) and on 5xx. Auth failures are returned as-is.
async fn send_with_retry(req: reqwest::RequestBuilder, label: &'static str) -> anyhow::Result<reqwest::Response> {
	let retry_builder = req.try_clone();
	let resp = req.send().await.with_context(|| format!("helix {label} send"))?;
	let status = resp.status();

	if status == StatusCode::TOO_MANY_REQUESTS
		&& let Some(delay) = retry_delay_from_headers(resp.headers())
		&& let Some(retry) = retry_builder
	{
		tokio::time::sleep(delay).await;
		let retry_resp = retry.send().await.with_context(|| format!("helix {label} retry send"))?;
		return Ok(retry_resp);
	}

	if status.is_server_error()
		&& let Some(retry) = retry_builder
	{
		tokio::time::sleep(Duration::from_millis(250)).await;
		let retry_resp = retry.send().await.with_context(|| format!("helix {label} retry send"))?;
		return Ok(retry_resp);
	}

	Ok(resp)
}

/// Connection settings shared by every Helix client of this process.
#[derive(Debug, Clone)]
pub struct HelixConfig {
	pub client_id: String,
	pub client_secret: SecretString,
	pub api_base: Url,
	pub oauth_base: Url,
	pub request_timeout: Duration,
	/// Scopes requested for the app-level token.
	pub app_scopes: Vec<String>,
}

impl HelixConfig {
	pub fn new(client_id: impl Into<String>, client_secret: SecretString) -> anyhow::Result<Self> {
		Ok(Self {
			client_id: client_id.into(),
			client_secret,
			api_base: Url::parse(DEFAULT_API_BASE).context("parse default helix base url")?,
			oauth_base: Url::parse(DEFAULT_OAUTH_BASE).context("parse default oauth base url")?,
			request_timeout: Duration::from_secs(10),
			app_scopes: Vec::new(),
		})
	}
}

/// Upstream reply: HTTP status plus the decoded payload (default-valued on failure).
#[derive(Debug, Clone, PartialEq)]
pub struct HelixResponse<T> {
	pub status: u16,
	pub data: T,
	pub message: Option<String>,
}

impl<T> HelixResponse<T> {
	pub fn ok(data: T) -> Self {
		Self {
			status: 200,
			data,
			message: None,
		}
	}

	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Error text for logs: upstream message when present, otherwise the status.
	pub fn describe(&self) -> String {
		match self.message.as_deref() {
			Some(m) => format!("status={} message={m}", self.status),
			None => format!("status={}", self.status),
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSubCondition {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub broadcaster_user_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSubTransport {
	pub method: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub callback: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub secret: Option<SecretString>,
}

impl EventSubTransport {
	pub fn webhook(callback: impl Into<String>, secret: SecretString) -> Self {
		Self {
			method: "webhook".to_string(),
			callback: Some(callback.into()),
			secret: Some(secret),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateSubscription {
	#[serde(rename = "type")]
	pub kind: String,
	pub version: String,
	pub condition: EventSubCondition,
	pub transport: EventSubTransport,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HelixSubscription {
	pub id: String,
	#[serde(default)]
	pub status: String,
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub version: String,
	#[serde(default)]
	pub condition: EventSubCondition,
	#[serde(default)]
	pub created_at: Option<String>,
}

/// One page of a subscription listing; `cursor` is the next page's `after`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionPage {
	pub data: Vec<HelixSubscription>,
	pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendChatMessage {
	pub broadcaster_id: String,
	pub sender_id: String,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reply_parent_message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelixDataResponse<T> {
	data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct HelixListSubscriptionsResponse {
	data: Vec<HelixSubscription>,
	#[serde(default)]
	pagination: Option<HelixPagination>,
}

#[derive(Debug, Deserialize)]
struct HelixPagination {
	#[serde(default)]
	cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelixSentMessage {
	#[serde(default)]
	is_sent: bool,
}

#[derive(Debug, Deserialize)]
struct HelixErrorBody {
	#[serde(default)]
	message: Option<String>,
}

fn error_message(body: &str) -> Option<String> {
	if body.trim().is_empty() {
		return None;
	}
	match serde_json::from_str::<HelixErrorBody>(body) {
		Ok(HelixErrorBody { message: Some(m) }) => Some(m),
		_ => Some(body.chars().take(256).collect()),
	}
}

async fn into_helix_response<B, T>(
	resp: reqwest::Response,
	label: &'static str,
	map: impl FnOnce(B) -> T,
) -> anyhow::Result<HelixResponse<T>>
where
	B: DeserializeOwned,
	T: Default,
{
	let status = resp.status();
	let body = resp.text().await.with_context(|| format!("helix {label} read body"))?;

	if !status.is_success() {
		return Ok(HelixResponse {
			status: status.as_u16(),
			data: T::default(),
			message: error_message(&body),
		});
	}

	let parsed: B = serde_json::from_str(&body).with_context(|| format!("helix {label} parse json"))?;
	Ok(HelixResponse {
		status: status.as_u16(),
		data: map(parsed),
		message: None,
	})
}

/// Upstream operations used by the subscription and chat paths.
#[async_trait::async_trait]
pub trait HelixApi: Send + Sync + 'static {
	async fn create_eventsub_subscription(
		&self,
		req: &CreateSubscription,
	) -> anyhow::Result<HelixResponse<Vec<HelixSubscription>>>;

	async fn list_eventsub_subscriptions(
		&self,
		user_id: Option<&str>,
		after: Option<&str>,
	) -> anyhow::Result<HelixResponse<SubscriptionPage>>;

	async fn delete_eventsub_subscription(&self, subscription_id: &str) -> anyhow::Result<HelixResponse<()>>;

	/// `data` is whether upstream accepted the message for delivery.
	async fn send_chat_message(&self, msg: &SendChatMessage) -> anyhow::Result<HelixResponse<bool>>;
}

enum ClientKind {
	App,
	User {
		account_id: String,
		hook: Option<Arc<dyn TokenRefreshHook>>,
	},
}

/// Authenticated Helix client. Token rotation swaps internal state; the client itself
/// stays the same instance for its whole life.
pub struct HelixClient {
	http: reqwest::Client,
	cfg: HelixConfig,
	kind: ClientKind,
	tokens: RwLock<TokenPair>,
	refresh_gate: tokio::sync::Mutex<()>,
}

impl HelixClient {
	fn build_http(timeout: Duration) -> anyhow::Result<reqwest::Client> {
		reqwest::Client::builder()
			.user_agent("tether/0.x (helix)")
			.timeout(timeout)
			.build()
			.context("build reqwest client")
	}

	/// App-level client via the client-credentials grant.
	pub async fn connect_app(cfg: HelixConfig) -> anyhow::Result<Self> {
		let http = Self::build_http(cfg.request_timeout)?;
		let token = oauth::request_app_token(
			&http,
			&cfg.oauth_base,
			&cfg.client_id,
			cfg.client_secret.expose(),
			&cfg.app_scopes,
		)
		.await
		.context("acquire app access token")?;

		info!(scopes = ?cfg.app_scopes, expires_in = token.expires_in, "helix app token acquired");

		Ok(Self {
			http,
			cfg,
			kind: ClientKind::App,
			tokens: RwLock::new(TokenPair::new(token.access_token, String::new())),
			refresh_gate: tokio::sync::Mutex::new(()),
		})
	}

	/// Per-account client. The access token is validated up front and refreshed once if rejected.
	pub async fn connect_user(
		cfg: HelixConfig,
		account_id: impl Into<String>,
		tokens: TokenPair,
		hook: Option<Arc<dyn TokenRefreshHook>>,
	) -> anyhow::Result<Self> {
		let account_id = account_id.into();
		let http = Self::build_http(cfg.request_timeout)?;
		let client = Self {
			http,
			cfg,
			kind: ClientKind::User {
				account_id: account_id.clone(),
				hook,
			},
			tokens: RwLock::new(tokens),
			refresh_gate: tokio::sync::Mutex::new(()),
		};

		let access = client.tokens.read().access.clone();
		match oauth::validate_user_token(&client.http, &client.cfg.oauth_base, access.expose()).await? {
			Some(validation) => {
				if let Some(user_id) = validation.user_id.as_deref()
					&& user_id != account_id
				{
					anyhow::bail!("token belongs to account {user_id}, expected {account_id}");
				}
				debug!(account_id = %account_id, expires_in = validation.expires_in, "helix user token validated");
			}
			None => {
				client
					.reauthenticate(&access)
					.await
					.with_context(|| format!("refresh rejected token (account={account_id})"))?;
			}
		}

		Ok(client)
	}

	pub fn account_id(&self) -> Option<&str> {
		match &self.kind {
			ClientKind::App => None,
			ClientKind::User { account_id, .. } => Some(account_id),
		}
	}

	/// Snapshot of the current token pair.
	pub fn tokens(&self) -> TokenPair {
		self.tokens.read().clone()
	}

	fn url(&self, path_and_query: &str) -> anyhow::Result<Url> {
		self.cfg.api_base.join(path_and_query).context("join helix url")
	}

	fn authed(&self, req: reqwest::RequestBuilder, bearer: &SecretString) -> reqwest::RequestBuilder {
		req.header("Client-Id", &self.cfg.client_id)
			.header("Authorization", format!("Bearer {}", bearer.expose()))
	}

	/// Send with the current token; on 401 rotate the token once and resend.
	async fn send_authed<F>(&self, label: &'static str, build: F) -> anyhow::Result<reqwest::Response>
	where
		F: Fn(&reqwest::Client) -> anyhow::Result<reqwest::RequestBuilder> + Send + Sync,
	{
		let bearer = self.tokens.read().access.clone();
		let resp = send_with_retry(self.authed(build(&self.http)?, &bearer), label).await?;

		if resp.status() != StatusCode::UNAUTHORIZED {
			return Ok(resp);
		}

		self.reauthenticate(&bearer)
			.await
			.with_context(|| format!("helix {label} reauthenticate"))?;

		let bearer = self.tokens.read().access.clone();
		send_with_retry(self.authed(build(&self.http)?, &bearer), label).await
	}

	async fn reauthenticate(&self, stale: &SecretString) -> anyhow::Result<()> {
		let _gate = self.refresh_gate.lock().await;

		let current = self.tokens.read().clone();
		if current.access != *stale {
			// rotated by a concurrent caller while we waited
			return Ok(());
		}

		match &self.kind {
			ClientKind::App => {
				let token = oauth::request_app_token(
					&self.http,
					&self.cfg.oauth_base,
					&self.cfg.client_id,
					self.cfg.client_secret.expose(),
					&self.cfg.app_scopes,
				)
				.await?;
				*self.tokens.write() = TokenPair::new(token.access_token, String::new());
				info!("helix app token reacquired");
			}
			ClientKind::User { account_id, hook } => {
				if !current.can_refresh() {
					anyhow::bail!("token rejected and no refresh token available (account={account_id})");
				}

				let refreshed = oauth::refresh_user_token(
					&self.http,
					&self.cfg.oauth_base,
					&self.cfg.client_id,
					self.cfg.client_secret.expose(),
					current.refresh.expose(),
				)
				.await?;

				let pair = TokenPair {
					access: SecretString::new(refreshed.access_token),
					refresh: refreshed.refresh_token.map(SecretString::new).unwrap_or(current.refresh),
				};
				*self.tokens.write() = pair.clone();

				metrics::counter!("tether_token_refresh_total").increment(1);
				info!(account_id = %account_id, expires_in = refreshed.expires_in, "helix user token refreshed");

				if let Some(hook) = hook {
					hook.tokens_refreshed(account_id, &pair);
				}
			}
		}

		Ok(())
	}
}

#[async_trait::async_trait]
impl HelixApi for HelixClient {
	async fn create_eventsub_subscription(
		&self,
		req: &CreateSubscription,
	) -> anyhow::Result<HelixResponse<Vec<HelixSubscription>>> {
		let resp = self
			.send_authed("POST /helix/eventsub/subscriptions", |http| {
				Ok(http.post(self.url(EVENTSUB_SUBSCRIPTIONS_PATH)?).json(req))
			})
			.await
			.with_context(|| format!("helix create subscription (type={})", req.kind))?;

		into_helix_response(resp, "POST /helix/eventsub/subscriptions", |b: HelixDataResponse<HelixSubscription>| {
			b.data
		})
		.await
	}

	async fn list_eventsub_subscriptions(
		&self,
		user_id: Option<&str>,
		after: Option<&str>,
	) -> anyhow::Result<HelixResponse<SubscriptionPage>> {
		let mut params: Vec<String> = Vec::new();
		if let Some(user_id) = user_id {
			params.push(format!("user_id={}", urlencoding::encode(user_id)));
		}
		if let Some(after) = after {
			params.push(format!("after={}", urlencoding::encode(after)));
		}
		let path = if params.is_empty() {
			EVENTSUB_SUBSCRIPTIONS_PATH.to_string()
		} else {
			format!("{EVENTSUB_SUBSCRIPTIONS_PATH}?{}", params.join("&"))
		};

		let resp = self
			.send_authed("GET /helix/eventsub/subscriptions", |http| Ok(http.get(self.url(&path)?)))
			.await?;

		into_helix_response(resp, "GET /helix/eventsub/subscriptions", |b: HelixListSubscriptionsResponse| {
			SubscriptionPage {
				data: b.data,
				cursor: b.pagination.and_then(|p| p.cursor),
			}
		})
		.await
	}

	async fn delete_eventsub_subscription(&self, subscription_id: &str) -> anyhow::Result<HelixResponse<()>> {
		let path = format!(
			"{base}?id={}",
			urlencoding::encode(subscription_id),
			base = EVENTSUB_SUBSCRIPTIONS_PATH
		);

		let resp = self
			.send_authed("DELETE /helix/eventsub/subscriptions", |http| Ok(http.delete(self.url(&path)?)))
			.await?;

		let status = resp.status();
		if status.is_success() {
			return Ok(HelixResponse {
				status: status.as_u16(),
				data: (),
				message: None,
			});
		}

		let body = resp
			.text()
			.await
			.context("helix DELETE /helix/eventsub/subscriptions read body")?;
		Ok(HelixResponse {
			status: status.as_u16(),
			data: (),
			message: error_message(&body),
		})
	}

	async fn send_chat_message(&self, msg: &SendChatMessage) -> anyhow::Result<HelixResponse<bool>> {
		let resp = self
			.send_authed("POST /helix/chat/messages", |http| {
				Ok(http.post(self.url(CHAT_MESSAGES_PATH)?).json(msg))
			})
			.await?;

		into_helix_response(resp, "POST /helix/chat/messages", |b: HelixDataResponse<HelixSentMessage>| {
			b.data.first().is_some_and(|m| m.is_sent)
		})
		.await
	}
}
