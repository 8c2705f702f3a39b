#![forbid(unsafe_code)]

pub mod clients;
pub mod eventsub;
pub mod helix;
pub mod subscriptions;

#[cfg(test)]
mod subscriptions_tests;

pub use clients::{
	ClientCache, ClientCacheConfig, CredentialRefreshHook, HelixClientFactory, RefreshedTokens, ReqwestClientFactory,
};
pub use eventsub::{EventSubType, TwitchNotification};
pub use helix::{HelixApi, HelixClient, HelixConfig, HelixResponse};
pub use subscriptions::{SubscribeAs, SubscriptionOrchestrator, WebhookSettings, default_required_scopes};
