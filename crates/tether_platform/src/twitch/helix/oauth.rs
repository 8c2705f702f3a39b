#![forbid(unsafe_code)]

use anyhow::Context;
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

const TOKEN_PATH: &str = "/oauth2/token";
const VALIDATE_PATH: &str = "/oauth2/validate";

#[derive(Debug, Clone, Deserialize)]
pub struct TwitchTokenValidation {
	pub client_id: String,
	#[serde(default)]
	pub login: Option<String>,
	#[serde(default)]
	pub user_id: Option<String>,
	pub expires_in: u64,
	#[serde(default)]
	pub scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct TwitchTokenResponse {
	pub access_token: String,
	#[serde(default)]
	pub refresh_token: Option<String>,
	pub expires_in: u64,
}

fn oauth_url(base: &Url, path: &str) -> anyhow::Result<Url> {
	base.join(path).context("join oauth url")
}

/// Validate a user access token. `Ok(None)` means upstream rejected it.
pub async fn validate_user_token(
	http: &reqwest::Client,
	oauth_base: &Url,
	access_token: &str,
) -> anyhow::Result<Option<TwitchTokenValidation>> {
	let resp = http
		.get(oauth_url(oauth_base, VALIDATE_PATH)?)
		.header("Authorization", format!("OAuth {access_token}"))
		.send()
		.await
		.context("twitch validate token request")?;

	let status = resp.status();
	if status == StatusCode::UNAUTHORIZED {
		return Ok(None);
	}

	let body = resp.text().await.context("twitch validate token read body")?;
	if !status.is_success() {
		anyhow::bail!("twitch validate token failed: status={status} body={body}");
	}

	serde_json::from_str(&body)
		.map(Some)
		.context("twitch validate token parse json")
}

pub async fn refresh_user_token(
	http: &reqwest::Client,
	oauth_base: &Url,
	client_id: &str,
	client_secret: &str,
	refresh_token: &str,
) -> anyhow::Result<TwitchTokenResponse> {
	let resp = http
		.post(oauth_url(oauth_base, TOKEN_PATH)?)
		.form(&[
			("grant_type", "refresh_token"),
			("client_id", client_id),
			("client_secret", client_secret),
			("refresh_token", refresh_token),
		])
		.send()
		.await
		.context("twitch refresh token request")?;

	let status = resp.status();
	let body = resp.text().await.context("twitch refresh token read body")?;

	if !status.is_success() {
		anyhow::bail!("twitch refresh token failed: status={status} body={body}");
	}

	serde_json::from_str(&body).context("twitch refresh token parse json")
}

/// Client-credentials grant for the app-level token.
pub async fn request_app_token(
	http: &reqwest::Client,
	oauth_base: &Url,
	client_id: &str,
	client_secret: &str,
	scopes: &[String],
) -> anyhow::Result<TwitchTokenResponse> {
	let scope = scopes.join(" ");
	let resp = http
		.post(oauth_url(oauth_base, TOKEN_PATH)?)
		.form(&[
			("grant_type", "client_credentials"),
			("client_id", client_id),
			("client_secret", client_secret),
			("scope", scope.as_str()),
		])
		.send()
		.await
		.context("twitch app token request")?;

	let status = resp.status();
	let body = resp.text().await.context("twitch app token read body")?;

	if !status.is_success() {
		anyhow::bail!("twitch app token failed: status={status} body={body}");
	}

	serde_json::from_str(&body).context("twitch app token parse json")
}
