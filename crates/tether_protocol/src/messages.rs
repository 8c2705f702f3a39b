#![forbid(unsafe_code)]

//! Payload types carried in the `data` field of bus envelopes.

use serde::{Deserialize, Serialize};
use tether_domain::{Platform, SecretString, TenantCredential, UserId};

/// `platform.start_bot.*` / `platform.stop_bot.*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotToggle {
	pub user_id: UserId,
}

/// `platform.get_bot.*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotGet {
	pub user_id: UserId,
}

/// `platform.chat_message_send.*` (fire-and-forget).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageSend {
	pub bot_id: String,
	pub broadcaster_id: String,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reply_to: Option<String>,
}

/// `webhook.notification.*`: a verified EventSub notification handed over by the ingress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookNotification {
	pub subscription_type: String,
	#[serde(default)]
	pub subscription_version: Option<String>,
	#[serde(default)]
	pub message_id: Option<String>,
	pub event: serde_json::Value,
}

/// `auth.provider_get`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthProviderGet {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<UserId>,
	pub provider: Platform,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub provider_user_id: Option<String>,
}

/// `auth.provider_update_tokens`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthProviderUpdateTokens {
	pub id: uuid::Uuid,
	pub access_token: SecretString,
	pub refresh_token: SecretString,
}

/// Reply to `auth.provider_get`: one linked upstream account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthProvider {
	pub id: uuid::Uuid,
	pub user_id: UserId,
	pub provider: Platform,
	pub provider_user_id: String,
	pub access_token: SecretString,
	pub refresh_token: SecretString,
	#[serde(default)]
	pub scopes: Vec<String>,
}

impl From<AuthProvider> for TenantCredential {
	fn from(p: AuthProvider) -> Self {
		TenantCredential {
			id: p.id,
			user_id: p.user_id,
			platform: p.provider,
			account_id: p.provider_user_id,
			access_token: p.access_token,
			refresh_token: p.refresh_token,
			scopes: p.scopes,
		}
	}
}
