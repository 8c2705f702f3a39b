#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use tether_domain::{AppError, Platform, SecretString, TenantCredential, TraceId, UserId};
use tether_platform::CredentialStore;
use tether_protocol::messages::{AuthProvider, AuthProviderGet, AuthProviderUpdateTokens};
use tether_protocol::{Subject, Topic};
use tracing::debug;

use crate::bus::MessageBus;
use crate::rpc;

fn subject(topic: Topic) -> Result<Subject, AppError> {
	topic
		.builder()
		.build_subject()
		.map_err(|e| AppError::internal(format!("invalid auth subject: {e}")))
}

/// Credential store served by the auth service over the bus.
pub struct BusCredentialStore {
	bus: Arc<dyn MessageBus>,
	timeout: Duration,
}

impl BusCredentialStore {
	pub fn new(bus: Arc<dyn MessageBus>, timeout: Duration) -> Self {
		Self { bus, timeout }
	}
}

#[async_trait::async_trait]
impl CredentialStore for BusCredentialStore {
	async fn get_by_user_and_platform(
		&self,
		trace_id: &TraceId,
		user_id: UserId,
		platform: Platform,
	) -> Result<TenantCredential, AppError> {
		let req = AuthProviderGet {
			user_id: Some(user_id),
			provider: platform,
			provider_user_id: None,
		};
		let provider: AuthProvider = rpc::request(
			self.bus.as_ref(),
			&subject(Topic::AuthProviderGet)?,
			trace_id,
			&req,
			self.timeout,
		)
		.await?;

		debug!(%trace_id, %user_id, %platform, account_id = %provider.provider_user_id, "credential resolved");
		Ok(provider.into())
	}

	async fn update_tokens(
		&self,
		trace_id: &TraceId,
		credential_id: uuid::Uuid,
		access_token: &SecretString,
		refresh_token: &SecretString,
	) -> Result<(), AppError> {
		let req = AuthProviderUpdateTokens {
			id: credential_id,
			access_token: access_token.clone(),
			refresh_token: refresh_token.clone(),
		};
		let _: bool = rpc::request(
			self.bus.as_ref(),
			&subject(Topic::AuthProviderUpdateTokens)?,
			trace_id,
			&req,
			self.timeout,
		)
		.await?;
		Ok(())
	}
}
