#![forbid(unsafe_code)]

pub mod store;
pub mod twitch;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use store::{CredentialStore, InMemoryCredentialStore};
pub use tether_domain::SecretString;

/// Access/refresh token pair for one upstream account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
	pub access: SecretString,
	pub refresh: SecretString,
}

impl TokenPair {
	pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
		Self {
			access: SecretString::new(access),
			refresh: SecretString::new(refresh),
		}
	}

	pub fn can_refresh(&self) -> bool {
		!self.refresh.expose().trim().is_empty()
	}
}

/// Callback fired by a user client after it rotated its token pair.
///
/// Runs inline in the request that triggered the refresh, so implementations
/// must return promptly and push slow work onto a background task.
pub trait TokenRefreshHook: Send + Sync + 'static {
	fn tokens_refreshed(&self, account_id: &str, tokens: &TokenPair);
}
