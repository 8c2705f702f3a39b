#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow, bail};
use serde::Deserialize;
use tether_domain::SecretString;
use tether_platform::twitch::{ClientCacheConfig, EventSubType, default_required_scopes};
use tether_util::endpoint::{BusEndpoint, parse_bind_addr};
use tracing::{info, warn};

use crate::rpc::DEFAULT_REQUEST_TIMEOUT;
use crate::server::bot_service::DEFAULT_GREETING;

const DEFAULT_BUS_URL: &str = "nats://127.0.0.1:4222";
const DEFAULT_BUS_NAME: &str = "tether-twitch";
const DEFAULT_CALLBACK_PATH: &str = "/twitch/callback";
const DEFAULT_DELETE_CONCURRENCY: usize = 8;

/// Default config path: `~/.tether/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".tether").join("config.toml"))
}

/// Load the server config from TOML, apply env overrides and validate it.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);
	cfg.validate()?;

	Ok(cfg)
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub bus: BusSettings,
	pub twitch: TwitchSettings,
	pub webhook: WebhookConfig,
	pub persistence: PersistenceSettings,
	pub cache: ClientCacheConfig,
}

#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	/// Ceiling for a single RPC handler.
	pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct BusSettings {
	/// Broker URL (`nats://host:port`).
	pub url: String,
	/// Connection name reported to the broker.
	pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct TwitchSettings {
	pub client_id: Option<String>,
	pub client_secret: Option<SecretString>,
	/// Scopes requested for the app access token.
	pub app_scopes: Vec<String>,
	/// Posted by the bot after it starts. `None` disables the greeting.
	pub greeting: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
	/// Public base URL of the webhook ingress (https).
	pub base_url: Option<String>,
	pub callback_path: String,
	/// Secret Twitch signs notifications with.
	pub secret: Option<SecretString>,
	/// Upper bound on concurrent subscription deletes.
	pub delete_concurrency: usize,
	/// Event type -> scopes a tenant must hold to subscribe. Replaces the built-in table when set.
	pub required_scopes: BTreeMap<String, Vec<String>>,
}

impl WebhookConfig {
	/// Absolute callback URL handed to Twitch.
	pub fn callback_url(&self) -> Option<String> {
		let base = self.base_url.as_deref()?.trim_end_matches('/');
		let path = self.callback_path.trim_start_matches('/');
		Some(format!("{base}/{path}"))
	}
}

#[derive(Debug, Clone, Default)]
pub struct PersistenceSettings {
	/// Postgres URL for bot state. Unset runs with process-local state.
	pub database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	bus: FileBusSettings,

	#[serde(default)]
	twitch: FileTwitchSettings,

	#[serde(default)]
	webhook: FileWebhookSettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,

	#[serde(default)]
	cache: FileCacheSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileBusSettings {
	url: Option<String>,
	name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileTwitchSettings {
	client_id: Option<String>,
	client_secret: Option<String>,
	#[serde(default)]
	app_scopes: Vec<String>,
	greeting: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileWebhookSettings {
	base_url: Option<String>,
	callback_path: Option<String>,
	secret: Option<String>,
	delete_concurrency: Option<usize>,
	required_scopes: Option<BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileCacheSettings {
	max_capacity: Option<u64>,
	idle_timeout_secs: Option<u64>,
	token_ttl_secs: Option<u64>,
}

fn clean_scope_table(raw: BTreeMap<String, Vec<String>>) -> BTreeMap<String, Vec<String>> {
	raw.into_iter()
		.map(|(event_type, scopes)| {
			let scopes = scopes
				.into_iter()
				.map(|s| s.trim().to_string())
				.filter(|s| !s.is_empty())
				.collect();
			(event_type.trim().to_string(), scopes)
		})
		.collect()
}

/// `type=scope,scope;type=scope`. An entry without `=` or with an empty type is malformed.
fn parse_scope_table(raw: &str) -> Option<BTreeMap<String, Vec<String>>> {
	let mut table = BTreeMap::new();
	for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
		let (event_type, scopes) = entry.split_once('=')?;
		let event_type = event_type.trim();
		if event_type.is_empty() {
			return None;
		}
		let scopes = scopes
			.split(',')
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.map(str::to_string)
			.collect();
		table.insert(event_type.to_string(), scopes);
	}
	Some(table)
}

/// Unset keeps the default; an empty string turns the greeting off.
fn greeting_from(raw: Option<String>) -> Option<String> {
	match raw {
		None => Some(DEFAULT_GREETING.to_string()),
		Some(g) if g.trim().is_empty() => None,
		Some(g) => Some(g),
	}
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let cache_defaults = ClientCacheConfig::default();

		Self {
			server: ServerSettings {
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: file.server.health_bind.filter(|s| !s.trim().is_empty()),
				request_timeout: file
					.server
					.request_timeout_secs
					.filter(|v| *v > 0)
					.map(Duration::from_secs)
					.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
			},
			bus: BusSettings {
				url: file
					.bus
					.url
					.filter(|s| !s.trim().is_empty())
					.unwrap_or_else(|| DEFAULT_BUS_URL.to_string()),
				name: file
					.bus
					.name
					.filter(|s| !s.trim().is_empty())
					.unwrap_or_else(|| DEFAULT_BUS_NAME.to_string()),
			},
			twitch: TwitchSettings {
				client_id: file.twitch.client_id.filter(|s| !s.trim().is_empty()),
				client_secret: file
					.twitch
					.client_secret
					.filter(|s| !s.trim().is_empty())
					.map(SecretString::new),
				app_scopes: file
					.twitch
					.app_scopes
					.into_iter()
					.map(|s| s.trim().to_string())
					.filter(|s| !s.is_empty())
					.collect(),
				greeting: greeting_from(file.twitch.greeting),
			},
			webhook: WebhookConfig {
				base_url: file.webhook.base_url.filter(|s| !s.trim().is_empty()),
				callback_path: file
					.webhook
					.callback_path
					.filter(|s| !s.trim().is_empty())
					.unwrap_or_else(|| DEFAULT_CALLBACK_PATH.to_string()),
				secret: file.webhook.secret.filter(|s| !s.trim().is_empty()).map(SecretString::new),
				delete_concurrency: file
					.webhook
					.delete_concurrency
					.filter(|v| *v > 0)
					.unwrap_or(DEFAULT_DELETE_CONCURRENCY),
				required_scopes: file
					.webhook
					.required_scopes
					.map(clean_scope_table)
					.unwrap_or_else(default_required_scopes),
			},
			persistence: PersistenceSettings {
				database_url: file.persistence.database_url.filter(|s| !s.trim().is_empty()),
			},
			cache: ClientCacheConfig {
				max_capacity: file.cache.max_capacity.unwrap_or(cache_defaults.max_capacity),
				idle_timeout: file
					.cache
					.idle_timeout_secs
					.map(Duration::from_secs)
					.unwrap_or(cache_defaults.idle_timeout),
				token_ttl: file
					.cache
					.token_ttl_secs
					.map(Duration::from_secs)
					.unwrap_or(cache_defaults.token_ttl),
			},
		}
	}

	/// Reject configs the service cannot start with.
	pub fn validate(&self) -> anyhow::Result<()> {
		BusEndpoint::parse(&self.bus.url).map_err(|e| anyhow!("bus.url: {e}"))?;

		if self.twitch.client_id.is_none() {
			bail!("twitch.client_id is required");
		}
		if self.twitch.client_secret.is_none() {
			bail!("twitch.client_secret is required");
		}

		let Some(base_url) = self.webhook.base_url.as_deref() else {
			bail!("webhook.base_url is required");
		};
		if !base_url.starts_with("https://") {
			bail!("webhook.base_url must be an https URL (got {base_url})");
		}
		match self.webhook.secret.as_ref() {
			None => bail!("webhook.secret is required"),
			// Twitch accepts 10..=100 ASCII characters.
			Some(secret) if !(10..=100).contains(&secret.expose().len()) => {
				bail!("webhook.secret must be 10 to 100 characters long")
			}
			Some(_) => {}
		}

		for event_type in self.webhook.required_scopes.keys() {
			event_type
				.parse::<EventSubType>()
				.map_err(|e| anyhow!("webhook.required_scopes: {e}"))?;
		}

		for (key, bind) in [
			("server.metrics_bind", self.server.metrics_bind.as_deref()),
			("server.health_bind", self.server.health_bind.as_deref()),
		] {
			if let Some(bind) = bind {
				parse_bind_addr(bind).map_err(|e| anyhow!("{key}: {e}"))?;
			}
		}

		if self.cache.max_capacity == 0 {
			bail!("cache.max_capacity must be positive");
		}

		Ok(())
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	apply_overrides(cfg, &|key| std::env::var(key).ok());
}

fn apply_overrides(cfg: &mut ServerConfig, env: &dyn Fn(&str) -> Option<String>) {
	let non_empty = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

	if let Some(v) = non_empty("TETHER_BUS_URL") {
		cfg.bus.url = v;
		info!("bus config: url overridden by env");
	}

	if let Some(v) = non_empty("TETHER_BUS_NAME") {
		cfg.bus.name = v;
		info!("bus config: name overridden by env");
	}

	if let Some(v) = non_empty("TETHER_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = non_empty("TETHER_HEALTH_BIND") {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}

	if let Some(v) = env("TETHER_REQUEST_TIMEOUT_SECS")
		&& let Ok(secs) = v.trim().parse::<u64>()
		&& secs > 0
	{
		cfg.server.request_timeout = Duration::from_secs(secs);
		info!(secs, "server config: request_timeout overridden by env");
	}

	if let Some(v) = non_empty("TETHER_TWITCH_CLIENT_ID") {
		cfg.twitch.client_id = Some(v);
		info!("twitch config: client_id overridden by env");
	}

	if let Some(v) = non_empty("TETHER_TWITCH_CLIENT_SECRET") {
		cfg.twitch.client_secret = Some(SecretString::new(v));
		info!("twitch config: client_secret overridden by env");
	}

	if let Some(v) = non_empty("TETHER_TWITCH_APP_SCOPES") {
		cfg.twitch.app_scopes = v
			.split([',', ' '])
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.map(str::to_string)
			.collect();
		info!(scopes = ?cfg.twitch.app_scopes, "twitch config: app_scopes overridden by env");
	}

	if let Some(v) = env("TETHER_TWITCH_GREETING") {
		cfg.twitch.greeting = greeting_from(Some(v));
		info!(enabled = cfg.twitch.greeting.is_some(), "twitch config: greeting overridden by env");
	}

	if let Some(v) = env("TETHER_TWITCH_GREETING_ENABLED")
		&& let Some(enabled) = parse_env_bool(&v)
		&& !enabled
	{
		cfg.twitch.greeting = None;
		info!("twitch config: greeting disabled by env");
	}

	if let Some(v) = non_empty("TETHER_WEBHOOK_BASE_URL") {
		cfg.webhook.base_url = Some(v);
		info!("webhook config: base_url overridden by env");
	}

	if let Some(v) = non_empty("TETHER_WEBHOOK_CALLBACK_PATH") {
		cfg.webhook.callback_path = v;
		info!("webhook config: callback_path overridden by env");
	}

	if let Some(v) = non_empty("TETHER_WEBHOOK_SECRET") {
		cfg.webhook.secret = Some(SecretString::new(v));
		info!("webhook config: secret overridden by env");
	}

	if let Some(v) = env("TETHER_WEBHOOK_DELETE_CONCURRENCY")
		&& let Ok(n) = v.trim().parse::<usize>()
	{
		if n == 0 {
			warn!("webhook config: delete_concurrency must be positive; ignoring env override");
		} else {
			cfg.webhook.delete_concurrency = n;
			info!(n, "webhook config: delete_concurrency overridden by env");
		}
	}

	if let Some(v) = non_empty("TETHER_WEBHOOK_REQUIRED_SCOPES") {
		match parse_scope_table(&v) {
			Some(table) => {
				cfg.webhook.required_scopes = table;
				info!(required_scopes = ?cfg.webhook.required_scopes, "webhook config: required_scopes overridden by env");
			}
			None => {
				warn!("webhook config: malformed required_scopes env (expected type=scope,scope;...); ignoring env override")
			}
		}
	}

	if let Some(v) = non_empty("TETHER_DATABASE_URL") {
		cfg.persistence.database_url = Some(v);
		info!("persistence: database_url overridden by env");
	}

	if let Some(v) = env("TETHER_CACHE_MAX_CAPACITY")
		&& let Ok(capacity) = v.trim().parse::<u64>()
	{
		cfg.cache.max_capacity = capacity;
		info!(capacity, "cache config: max_capacity overridden by env");
	}

	if let Some(v) = env("TETHER_CACHE_IDLE_TIMEOUT_SECS")
		&& let Ok(secs) = v.trim().parse::<u64>()
	{
		cfg.cache.idle_timeout = Duration::from_secs(secs);
		info!(secs, "cache config: idle_timeout overridden by env");
	}

	if cfg.persistence.database_url.is_none() {
		warn!("persistence: no database_url configured, bot state is process-local");
	}
}
