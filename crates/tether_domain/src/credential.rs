#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::{Platform, SecretString, UserId};

/// A tenant's linked upstream account, as held by the credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantCredential {
	/// Credential row id in the credential store.
	pub id: uuid::Uuid,
	pub user_id: UserId,
	pub platform: Platform,
	/// Upstream (platform-side) account id.
	pub account_id: String,
	pub access_token: SecretString,
	pub refresh_token: SecretString,
	#[serde(default)]
	pub scopes: Vec<String>,
}

impl TenantCredential {
	pub fn has_scope(&self, scope: &str) -> bool {
		self.scopes.iter().any(|s| s == scope)
	}

	/// Scopes from `required` this credential was not granted, in `required` order.
	pub fn missing_scopes<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
		required
			.iter()
			.filter(|s| !self.has_scope(s))
			.map(String::as_str)
			.collect()
	}
}
