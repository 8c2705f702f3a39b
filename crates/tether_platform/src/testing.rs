#![forbid(unsafe_code)]

//! In-memory fakes of the upstream API and the credential store.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tether_domain::{AppError, Platform, SecretString, TenantCredential, TraceId, UserId};
use tokio::sync::Semaphore;

use crate::twitch::helix::{
	CreateSubscription, HelixApi, HelixResponse, HelixSubscription, SendChatMessage, SubscriptionPage,
};
use crate::twitch::HelixClientFactory;
use crate::{CredentialStore, InMemoryCredentialStore, TokenPair, TokenRefreshHook};

pub fn tenant_credential(account_id: &str, scopes: &[&str]) -> TenantCredential {
	TenantCredential {
		id: uuid::Uuid::new_v4(),
		user_id: UserId::new_v4(),
		platform: Platform::Twitch,
		account_id: account_id.to_string(),
		access_token: SecretString::new(format!("access-{account_id}")),
		refresh_token: SecretString::new(format!("refresh-{account_id}")),
		scopes: scopes.iter().map(|s| s.to_string()).collect(),
	}
}

pub fn subscription(id: &str, kind: &str, broadcaster_id: &str, user_id: Option<&str>) -> HelixSubscription {
	HelixSubscription {
		id: id.to_string(),
		status: "enabled".to_string(),
		kind: kind.to_string(),
		version: "1".to_string(),
		condition: crate::twitch::helix::EventSubCondition {
			broadcaster_user_id: Some(broadcaster_id.to_string()),
			user_id: user_id.map(str::to_string),
		},
		created_at: None,
	}
}

#[derive(Default)]
struct FakeHelixState {
	subscriptions: Vec<HelixSubscription>,
	next_id: u64,
	fail_create: HashSet<String>,
	fail_delete: HashSet<String>,
	pages: Option<VecDeque<SubscriptionPage>>,
	created: Vec<CreateSubscription>,
	list_calls: Vec<(Option<String>, Option<String>)>,
	deleted: Vec<String>,
	sent: Vec<SendChatMessage>,
}

/// Scriptable stand-in for the Helix API.
#[derive(Default)]
pub struct FakeHelix {
	state: Mutex<FakeHelixState>,
	delay: Option<Duration>,
	in_flight: AtomicUsize,
	max_in_flight: AtomicUsize,
}

impl FakeHelix {
	pub fn new() -> Self {
		Self::default()
	}

	/// Every call sleeps this long before answering.
	pub fn with_delay(delay: Duration) -> Self {
		Self {
			delay: Some(delay),
			..Self::default()
		}
	}

	/// Create calls for this event type answer 400.
	pub fn fail_create_for(&self, event_type: &str) {
		self.state.lock().fail_create.insert(event_type.to_string());
	}

	/// Delete calls for this subscription id answer 500.
	pub fn fail_delete_for(&self, subscription_id: &str) {
		self.state.lock().fail_delete.insert(subscription_id.to_string());
	}

	/// Serve these pages in order from the listing instead of the stored subscriptions.
	pub fn script_pages(&self, pages: Vec<SubscriptionPage>) {
		self.state.lock().pages = Some(pages.into());
	}

	pub fn seed(&self, sub: HelixSubscription) {
		self.state.lock().subscriptions.push(sub);
	}

	pub fn subscriptions(&self) -> Vec<HelixSubscription> {
		self.state.lock().subscriptions.clone()
	}

	pub fn created(&self) -> Vec<CreateSubscription> {
		self.state.lock().created.clone()
	}

	pub fn list_calls(&self) -> Vec<(Option<String>, Option<String>)> {
		self.state.lock().list_calls.clone()
	}

	pub fn deleted(&self) -> Vec<String> {
		self.state.lock().deleted.clone()
	}

	pub fn sent(&self) -> Vec<SendChatMessage> {
		self.state.lock().sent.clone()
	}

	/// Calls of any kind made so far.
	pub fn total_calls(&self) -> usize {
		let st = self.state.lock();
		st.created.len() + st.list_calls.len() + st.deleted.len() + st.sent.len()
	}

	pub fn max_in_flight(&self) -> usize {
		self.max_in_flight.load(Ordering::SeqCst)
	}

	async fn enter(&self) {
		let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_in_flight.fetch_max(now, Ordering::SeqCst);
		if let Some(delay) = self.delay {
			tokio::time::sleep(delay).await;
		}
	}

	fn exit(&self) {
		self.in_flight.fetch_sub(1, Ordering::SeqCst);
	}
}

fn rejected<T: Default>(status: u16, message: &str) -> HelixResponse<T> {
	HelixResponse {
		status,
		data: T::default(),
		message: Some(message.to_string()),
	}
}

#[async_trait::async_trait]
impl HelixApi for FakeHelix {
	async fn create_eventsub_subscription(
		&self,
		req: &CreateSubscription,
	) -> anyhow::Result<HelixResponse<Vec<HelixSubscription>>> {
		self.enter().await;
		let resp = {
			let mut st = self.state.lock();
			st.created.push(req.clone());
			if st.fail_create.contains(&req.kind) {
				rejected(400, "invalid subscription")
			} else {
				st.next_id += 1;
				let sub = HelixSubscription {
					id: format!("sub-{}", st.next_id),
					status: "webhook_callback_verification_pending".to_string(),
					kind: req.kind.clone(),
					version: req.version.clone(),
					condition: req.condition.clone(),
					created_at: None,
				};
				st.subscriptions.push(sub.clone());
				HelixResponse {
					status: 202,
					data: vec![sub],
					message: None,
				}
			}
		};
		self.exit();
		Ok(resp)
	}

	async fn list_eventsub_subscriptions(
		&self,
		user_id: Option<&str>,
		after: Option<&str>,
	) -> anyhow::Result<HelixResponse<SubscriptionPage>> {
		self.enter().await;
		let page = {
			let mut st = self.state.lock();
			st.list_calls.push((user_id.map(str::to_string), after.map(str::to_string)));
			let scripted = st.pages.as_mut().map(|pages| pages.pop_front().unwrap_or_default());
			match scripted {
				Some(page) => page,
				None => SubscriptionPage {
					data: st
						.subscriptions
						.iter()
						.filter(|s| {
							user_id.is_none_or(|u| {
								s.condition.broadcaster_user_id.as_deref() == Some(u)
									|| s.condition.user_id.as_deref() == Some(u)
							})
						})
						.cloned()
						.collect(),
					cursor: None,
				},
			}
		};
		self.exit();
		Ok(HelixResponse::ok(page))
	}

	async fn delete_eventsub_subscription(&self, subscription_id: &str) -> anyhow::Result<HelixResponse<()>> {
		self.enter().await;
		let resp = {
			let mut st = self.state.lock();
			st.deleted.push(subscription_id.to_string());
			if st.fail_delete.contains(subscription_id) {
				rejected(500, "internal server error")
			} else {
				st.subscriptions.retain(|s| s.id != subscription_id);
				HelixResponse {
					status: 204,
					data: (),
					message: None,
				}
			}
		};
		self.exit();
		Ok(resp)
	}

	async fn send_chat_message(&self, msg: &SendChatMessage) -> anyhow::Result<HelixResponse<bool>> {
		self.enter().await;
		self.state.lock().sent.push(msg.clone());
		self.exit();
		Ok(HelixResponse::ok(true))
	}
}

/// Client factory handing out [`FakeHelix`] instances and recording every construction.
#[derive(Default)]
pub struct FakeClientFactory {
	constructions: AtomicUsize,
	delay: Option<Duration>,
	fail: AtomicBool,
	hooks: Mutex<Vec<(String, Arc<dyn TokenRefreshHook>)>>,
	tokens_seen: Mutex<Vec<(String, TokenPair)>>,
}

impl FakeClientFactory {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_delay(delay: Duration) -> Self {
		Self {
			delay: Some(delay),
			..Self::default()
		}
	}

	/// Make subsequent constructions fail as if upstream rejected the tokens.
	pub fn set_failing(&self, fail: bool) {
		self.fail.store(fail, Ordering::SeqCst);
	}

	pub fn constructions(&self) -> usize {
		self.constructions.load(Ordering::SeqCst)
	}

	/// Refresh hook registered for the most recent construction of `account_id`.
	pub fn hook(&self, account_id: &str) -> Option<Arc<dyn TokenRefreshHook>> {
		self.hooks
			.lock()
			.iter()
			.rev()
			.find(|(id, _)| id == account_id)
			.map(|(_, hook)| Arc::clone(hook))
	}

	/// Token pair the most recent construction of `account_id` started from.
	pub fn tokens_seen(&self, account_id: &str) -> Option<TokenPair> {
		self.tokens_seen
			.lock()
			.iter()
			.rev()
			.find(|(id, _)| id == account_id)
			.map(|(_, tokens)| tokens.clone())
	}
}

#[async_trait::async_trait]
impl HelixClientFactory for FakeClientFactory {
	async fn user_client(
		&self,
		account_id: &str,
		tokens: TokenPair,
		hook: Arc<dyn TokenRefreshHook>,
	) -> anyhow::Result<Arc<dyn HelixApi>> {
		if let Some(delay) = self.delay {
			tokio::time::sleep(delay).await;
		}
		self.constructions.fetch_add(1, Ordering::SeqCst);

		if self.fail.load(Ordering::SeqCst) {
			anyhow::bail!("token rejected (account={account_id})");
		}

		self.tokens_seen.lock().push((account_id.to_string(), tokens));
		self.hooks.lock().push((account_id.to_string(), hook));
		Ok(Arc::new(FakeHelix::new()))
	}
}

/// Credential store whose `update_tokens` blocks until released.
pub struct GatedCredentialStore {
	inner: InMemoryCredentialStore,
	gate: Semaphore,
	pending: AtomicUsize,
	updates: Mutex<Vec<(uuid::Uuid, TokenPair)>>,
}

impl Default for GatedCredentialStore {
	fn default() -> Self {
		Self {
			inner: InMemoryCredentialStore::new(),
			gate: Semaphore::new(0),
			pending: AtomicUsize::new(0),
			updates: Mutex::new(Vec::new()),
		}
	}
}

impl GatedCredentialStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&self, credential: TenantCredential) {
		self.inner.insert(credential);
	}

	/// Let `n` blocked updates through.
	pub fn release(&self, n: usize) {
		self.gate.add_permits(n);
	}

	/// Updates currently waiting at the gate.
	pub fn pending(&self) -> usize {
		self.pending.load(Ordering::SeqCst)
	}

	pub fn updates(&self) -> Vec<(uuid::Uuid, TokenPair)> {
		self.updates.lock().clone()
	}
}

#[async_trait::async_trait]
impl CredentialStore for GatedCredentialStore {
	async fn get_by_user_and_platform(
		&self,
		trace_id: &TraceId,
		user_id: UserId,
		platform: Platform,
	) -> Result<TenantCredential, AppError> {
		self.inner.get_by_user_and_platform(trace_id, user_id, platform).await
	}

	async fn update_tokens(
		&self,
		trace_id: &TraceId,
		credential_id: uuid::Uuid,
		access_token: &SecretString,
		refresh_token: &SecretString,
	) -> Result<(), AppError> {
		self.pending.fetch_add(1, Ordering::SeqCst);
		let permit = self
			.gate
			.acquire()
			.await
			.map_err(|_| AppError::internal("gate closed"))?;
		permit.forget();
		self.pending.fetch_sub(1, Ordering::SeqCst);

		self.updates.lock().push((
			credential_id,
			TokenPair {
				access: access_token.clone(),
				refresh: refresh_token.clone(),
			},
		));
		self.inner
			.update_tokens(trace_id, credential_id, access_token, refresh_token)
			.await
	}
}
