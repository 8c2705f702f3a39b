#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tether_domain::{AppError, Platform, SecretString, TenantCredential, TraceId};
use tracing::{debug, info, warn};

use super::helix::{HelixApi, HelixClient, HelixConfig};
use crate::{CredentialStore, TokenPair, TokenRefreshHook};

const PERSIST_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds authenticated per-account upstream clients.
#[async_trait::async_trait]
pub trait HelixClientFactory: Send + Sync + 'static {
	async fn user_client(
		&self,
		account_id: &str,
		tokens: TokenPair,
		hook: Arc<dyn TokenRefreshHook>,
	) -> anyhow::Result<Arc<dyn HelixApi>>;
}

/// Factory producing real [`HelixClient`]s.
pub struct ReqwestClientFactory {
	cfg: HelixConfig,
}

impl ReqwestClientFactory {
	pub fn new(cfg: HelixConfig) -> Self {
		Self { cfg }
	}
}

#[async_trait::async_trait]
impl HelixClientFactory for ReqwestClientFactory {
	async fn user_client(
		&self,
		account_id: &str,
		tokens: TokenPair,
		hook: Arc<dyn TokenRefreshHook>,
	) -> anyhow::Result<Arc<dyn HelixApi>> {
		let client = HelixClient::connect_user(self.cfg.clone(), account_id, tokens, Some(hook)).await?;
		Ok(Arc::new(client))
	}
}

#[derive(Debug, Clone)]
pub struct ClientCacheConfig {
	pub max_capacity: u64,
	/// Clients unused for this long are dropped.
	pub idle_timeout: Duration,
	/// Lifetime of refreshed token pairs in the side cache.
	pub token_ttl: Duration,
}

impl Default for ClientCacheConfig {
	fn default() -> Self {
		Self {
			max_capacity: 10_000,
			idle_timeout: Duration::from_secs(30 * 60),
			token_ttl: Duration::from_secs(10 * 60),
		}
	}
}

fn side_cache_key(platform: Platform, account_id: &str) -> String {
	format!("{platform}.{account_id}")
}

/// Side-cache entry: the latest rotated pair plus every access token it superseded.
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
	pub tokens: TokenPair,
	pub superseded: Vec<SecretString>,
}

impl RefreshedTokens {
	/// True when `access` is this pair or one it replaced, i.e. the caller's copy is not newer.
	fn covers(&self, access: &SecretString) -> bool {
		self.tokens.access == *access || self.superseded.contains(access)
	}
}

/// Process-wide cache of authenticated upstream clients, one per upstream account.
///
/// Lookups are lock-free for readers. A miss runs a single construction per key;
/// concurrent callers for the same key wait for it. Failed constructions are not cached.
pub struct ClientCache {
	platform: Platform,
	app: Arc<dyn HelixApi>,
	factory: Arc<dyn HelixClientFactory>,
	store: Arc<dyn CredentialStore>,
	clients: moka::future::Cache<String, Arc<dyn HelixApi>>,
	refreshed: moka::sync::Cache<String, RefreshedTokens>,
}

impl ClientCache {
	pub fn new(
		platform: Platform,
		app: Arc<dyn HelixApi>,
		factory: Arc<dyn HelixClientFactory>,
		store: Arc<dyn CredentialStore>,
		cfg: &ClientCacheConfig,
	) -> Self {
		let clients = moka::future::Cache::builder()
			.max_capacity(cfg.max_capacity)
			.time_to_idle(cfg.idle_timeout)
			.build();
		let refreshed = moka::sync::Cache::builder()
			.max_capacity(cfg.max_capacity)
			.time_to_live(cfg.token_ttl)
			.build();

		Self {
			platform,
			app,
			factory,
			store,
			clients,
			refreshed,
		}
	}

	pub fn platform(&self) -> Platform {
		self.platform
	}

	/// App-level client, authenticated at startup.
	pub fn app_client(&self) -> Arc<dyn HelixApi> {
		Arc::clone(&self.app)
	}

	/// Cached client for `account_id`. Never constructs.
	pub async fn get_by_account_id(&self, account_id: &str) -> Result<Arc<dyn HelixApi>, AppError> {
		self.clients
			.get(account_id)
			.await
			.ok_or_else(|| AppError::not_found(format!("no {} client cached for account {account_id}", self.platform)))
	}

	/// Cached client for the credential's account, constructing it on first use.
	pub async fn get_or_create_by_credential(
		&self,
		credential: &TenantCredential,
	) -> Result<Arc<dyn HelixApi>, AppError> {
		let account_id = credential.account_id.clone();

		let init = async {
			let key = side_cache_key(self.platform, &credential.account_id);
			let stored = TokenPair {
				access: credential.access_token.clone(),
				refresh: credential.refresh_token.clone(),
			};
			let (tokens, superseded) = match self.refreshed.get(&key) {
				Some(side) if side.covers(&credential.access_token) => (side.tokens, side.superseded),
				Some(_) => {
					// rotated elsewhere after our last refresh
					debug!(platform = %self.platform, account_id = %credential.account_id, "stored tokens newer than side cache");
					self.refreshed.invalidate(&key);
					(stored, Vec::new())
				}
				None => (stored, Vec::new()),
			};

			let hook: Arc<dyn TokenRefreshHook> = Arc::new(CredentialRefreshHook::new(
				self.platform,
				credential.id,
				Arc::clone(&self.store),
				self.refreshed.clone(),
				tokens.access.clone(),
				superseded,
			));

			let client = self.factory.user_client(&credential.account_id, tokens, hook).await?;

			metrics::counter!("tether_client_cache_constructions_total").increment(1);
			info!(platform = %self.platform, account_id = %credential.account_id, user_id = %credential.user_id, "upstream client constructed");
			Ok::<_, anyhow::Error>(client)
		};

		self.clients.try_get_with(account_id, init).await.map_err(|e| {
			warn!(
				platform = %self.platform,
				account_id = %credential.account_id,
				user_id = %credential.user_id,
				error = %e,
				"upstream client construction failed"
			);
			AppError::unauthenticated(format!(
				"cannot authenticate {} account {}",
				self.platform, credential.account_id
			))
		})
	}

	/// Last refreshed token pair for `account_id`, while still in the side cache.
	pub fn refreshed_tokens(&self, account_id: &str) -> Option<TokenPair> {
		self.refreshed
			.get(&side_cache_key(self.platform, account_id))
			.map(|side| side.tokens)
	}
}

/// Refresh hook registered with every per-account client.
///
/// Records the rotated pair in the side cache, then persists it in the background.
pub struct CredentialRefreshHook {
	platform: Platform,
	credential_id: uuid::Uuid,
	store: Arc<dyn CredentialStore>,
	refreshed: moka::sync::Cache<String, RefreshedTokens>,
	/// Access token in use plus the ones it replaced.
	chain: Mutex<(SecretString, Vec<SecretString>)>,
}

impl CredentialRefreshHook {
	pub fn new(
		platform: Platform,
		credential_id: uuid::Uuid,
		store: Arc<dyn CredentialStore>,
		refreshed: moka::sync::Cache<String, RefreshedTokens>,
		current_access: SecretString,
		superseded: Vec<SecretString>,
	) -> Self {
		Self {
			platform,
			credential_id,
			store,
			refreshed,
			chain: Mutex::new((current_access, superseded)),
		}
	}
}

impl TokenRefreshHook for CredentialRefreshHook {
	fn tokens_refreshed(&self, account_id: &str, tokens: &TokenPair) {
		let entry = {
			let mut chain = self.chain.lock();
			let previous = std::mem::replace(&mut chain.0, tokens.access.clone());
			chain.1.push(previous);
			RefreshedTokens {
				tokens: tokens.clone(),
				superseded: chain.1.clone(),
			}
		};
		self.refreshed.insert(side_cache_key(self.platform, account_id), entry);

		let store = Arc::clone(&self.store);
		let credential_id = self.credential_id;
		let account_id = account_id.to_string();
		let tokens = tokens.clone();

		tokio::spawn(async move {
			let trace_id = TraceId::generate();
			let persist = store.update_tokens(&trace_id, credential_id, &tokens.access, &tokens.refresh);

			match tokio::time::timeout(PERSIST_TIMEOUT, persist).await {
				Ok(Ok(())) => {
					debug!(trace_id = %trace_id, %credential_id, account_id = %account_id, "refreshed tokens persisted");
				}
				Ok(Err(e)) => {
					warn!(trace_id = %trace_id, %credential_id, account_id = %account_id, error = %e, "failed to persist refreshed tokens");
				}
				Err(_) => {
					warn!(trace_id = %trace_id, %credential_id, account_id = %account_id, "timed out persisting refreshed tokens");
				}
			}
		});
	}
}
