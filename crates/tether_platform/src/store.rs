#![forbid(unsafe_code)]

use std::collections::HashMap;

use parking_lot::RwLock;
use tether_domain::{AppError, Platform, SecretString, TenantCredential, TraceId, UserId};

/// Durable store of tenant credentials. Owned by another service.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync + 'static {
	async fn get_by_user_and_platform(
		&self,
		trace_id: &TraceId,
		user_id: UserId,
		platform: Platform,
	) -> Result<TenantCredential, AppError>;

	async fn update_tokens(
		&self,
		trace_id: &TraceId,
		credential_id: uuid::Uuid,
		access_token: &SecretString,
		refresh_token: &SecretString,
	) -> Result<(), AppError>;
}

/// Process-local credential store for development runs and tests.
#[derive(Default)]
pub struct InMemoryCredentialStore {
	credentials: RwLock<HashMap<uuid::Uuid, TenantCredential>>,
}

impl InMemoryCredentialStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&self, credential: TenantCredential) {
		self.credentials.write().insert(credential.id, credential);
	}

	pub fn get(&self, id: uuid::Uuid) -> Option<TenantCredential> {
		self.credentials.read().get(&id).cloned()
	}
}

#[async_trait::async_trait]
impl CredentialStore for InMemoryCredentialStore {
	async fn get_by_user_and_platform(
		&self,
		_trace_id: &TraceId,
		user_id: UserId,
		platform: Platform,
	) -> Result<TenantCredential, AppError> {
		self.credentials
			.read()
			.values()
			.find(|c| c.user_id == user_id && c.platform == platform)
			.cloned()
			.ok_or_else(|| AppError::not_found(format!("no {platform} credential for user {user_id}")))
	}

	async fn update_tokens(
		&self,
		_trace_id: &TraceId,
		credential_id: uuid::Uuid,
		access_token: &SecretString,
		refresh_token: &SecretString,
	) -> Result<(), AppError> {
		let mut guard = self.credentials.write();
		let cred = guard
			.get_mut(&credential_id)
			.ok_or_else(|| AppError::not_found(format!("credential {credential_id} not found")))?;
		cred.access_token = access_token.clone();
		cred.refresh_token = refresh_token.clone();
		Ok(())
	}
}
