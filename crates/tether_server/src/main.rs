#![forbid(unsafe_code)]

mod bus;
mod config;
mod rpc;
mod server;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use tether_domain::Platform;
use tether_platform::CredentialStore;
use tether_platform::twitch::{
	ClientCache, HelixClient, HelixConfig, ReqwestClientFactory, SubscriptionOrchestrator, WebhookSettings,
};
use tether_util::endpoint::parse_bind_addr;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::bus::MessageBus;
use crate::config::ServerConfig;
use crate::rpc::Dispatcher;
use crate::server::auth_client::BusCredentialStore;
use crate::server::bot_service::BotService;
use crate::server::chat::ChatService;
use crate::server::controllers::Controllers;
use crate::server::health::{HealthState, spawn_health_server};
use crate::server::relay::EventRelay;
use crate::store::{BotStore, InMemoryBotStore, PgBotStore};

const PLATFORM: Platform = Platform::Twitch;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: tether_server [--config path]\n\
\n\
Options:\n\
\t--config  Config file (default: ~/.tether/config.toml)\n\
\t--help    Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> Option<PathBuf> {
	let mut config_path = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--config" | "-c" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				config_path = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	config_path
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tether_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("tether_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match parse_bind_addr(bind) {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[cfg(feature = "nats")]
async fn connect_bus(cfg: &ServerConfig) -> anyhow::Result<Arc<dyn MessageBus>> {
	let endpoint = tether_util::endpoint::BusEndpoint::parse(&cfg.bus.url).map_err(|e| anyhow::anyhow!("bus.url: {e}"))?;
	let bus = crate::bus::NatsBus::connect(&endpoint.url(), &cfg.bus.name).await?;
	info!(url = %endpoint.url(), "message broker connected");
	Ok(Arc::new(bus))
}

#[cfg(not(feature = "nats"))]
async fn connect_bus(_cfg: &ServerConfig) -> anyhow::Result<Arc<dyn MessageBus>> {
	warn!("built without broker support, using the in-process bus");
	Ok(Arc::new(crate::bus::InMemoryBus::new()))
}

async fn connect_bot_store(cfg: &ServerConfig) -> anyhow::Result<Arc<dyn BotStore>> {
	match cfg.persistence.database_url.as_deref() {
		Some(url) => {
			let store = PgBotStore::connect(url, PLATFORM).await?;
			info!("bot store: postgres");
			Ok(Arc::new(store))
		}
		None => {
			warn!("bot store: in-memory (state is lost on restart)");
			Ok(Arc::new(InMemoryBotStore::new()))
		}
	}
}

fn helix_config(cfg: &ServerConfig) -> anyhow::Result<HelixConfig> {
	let client_id = cfg.twitch.client_id.clone().context("twitch.client_id missing")?;
	let client_secret = cfg.twitch.client_secret.clone().context("twitch.client_secret missing")?;
	let mut helix = HelixConfig::new(client_id, client_secret)?;
	helix.app_scopes = cfg.twitch.app_scopes.clone();
	Ok(helix)
}

fn webhook_settings(cfg: &ServerConfig) -> anyhow::Result<WebhookSettings> {
	let callback_url = cfg.webhook.callback_url().context("webhook.base_url missing")?;
	let secret = cfg.webhook.secret.clone().context("webhook.secret missing")?;
	let mut settings = WebhookSettings::new(callback_url, secret);
	settings.delete_concurrency = cfg.webhook.delete_concurrency;
	settings.required_scopes = cfg.webhook.required_scopes.clone();
	Ok(settings)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let config_path = match parse_args() {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let bus = connect_bus(&server_cfg).await?;

	let health_state = HealthState::new(Arc::clone(&bus));
	if let Some(bind) = server_cfg.server.health_bind.as_deref() {
		match parse_bind_addr(bind) {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let helix_cfg = helix_config(&server_cfg)?;
	let app_client = HelixClient::connect_app(helix_cfg.clone())
		.await
		.context("authenticate twitch app client")?;

	let credentials: Arc<dyn CredentialStore> =
		Arc::new(BusCredentialStore::new(Arc::clone(&bus), server_cfg.server.request_timeout));
	let clients = Arc::new(ClientCache::new(
		PLATFORM,
		Arc::new(app_client),
		Arc::new(ReqwestClientFactory::new(helix_cfg)),
		Arc::clone(&credentials),
		&server_cfg.cache,
	));
	let subscriptions = Arc::new(SubscriptionOrchestrator::new(
		Arc::clone(&clients),
		webhook_settings(&server_cfg)?,
	));

	let bots = connect_bot_store(&server_cfg).await?;
	let chat = Arc::new(ChatService::new(Arc::clone(&clients)));
	let controllers = Controllers {
		platform: PLATFORM,
		bots: Arc::new(BotService::new(
			PLATFORM,
			Arc::clone(&bots),
			credentials,
			subscriptions,
			Arc::clone(&chat),
			server_cfg.twitch.greeting.clone(),
		)),
		chat,
		relay: Arc::new(EventRelay::new(PLATFORM, bots, Arc::clone(&bus))),
	};

	let dispatcher = Dispatcher::new(Arc::clone(&bus), server_cfg.server.request_timeout);
	controllers.connect(&dispatcher).await?;

	health_state.mark_ready();
	info!(platform = %PLATFORM, "tether_server ready");

	tokio::signal::ctrl_c().await.context("wait for shutdown signal")?;
	info!("shutdown requested");

	health_state.mark_not_ready();
	dispatcher.shutdown();
	if let Err(e) = bus.flush().await {
		warn!(error = ?e, "failed to flush message broker connection");
	}

	Ok(())
}
