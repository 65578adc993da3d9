//! Access tokens for the Google APIs, read from an authorized-user token cache.
//!
//! The cache has the shape written by Google's installed-app consent flow.
//! Expired tokens are refreshed with the stored refresh token and the cache is
//! rewritten. Running the interactive consent flow itself is left to Google's
//! own tooling.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::info;

use super::{http_client, send_json};
use crate::config::CollectorConfig;

pub const SCOPE_GA4: &str = "https://www.googleapis.com/auth/analytics.readonly";
pub const SCOPE_GSC: &str = "https://www.googleapis.com/auth/webmasters.readonly";
pub const SCOPE_ADSENSE: &str = "https://www.googleapis.com/auth/adsense.readonly";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizedUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl AuthorizedUser {
    pub fn covers(&self, scopes: &[&str]) -> bool {
        let granted: BTreeSet<&str> = self.scopes.iter().map(String::as_str).collect();
        scopes.iter().all(|scope| granted.contains(scope))
    }

    /// The cached access token, if it is still valid at `now`.
    pub fn valid_token(&self, now: DateTime<Utc>) -> Option<&str> {
        let token = self.token.as_deref().filter(|t| !t.is_empty())?;
        match self.expiry {
            Some(expiry) if expiry - Duration::seconds(EXPIRY_SKEW_SECS) > now => Some(token),
            _ => None,
        }
    }

    /// Stores a refresh-endpoint response on the cache entry.
    pub fn apply_refresh(&mut self, response: &Value, now: DateTime<Utc>) -> Result<()> {
        let token = response
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .context("Token refresh response has no access_token")?;
        let expires_in = response
            .get("expires_in")
            .and_then(Value::as_i64)
            .unwrap_or(3600);

        self.token = Some(token.to_string());
        self.expiry = Some(now + Duration::seconds(expires_in));
        if let Some(rotated) = response.get("refresh_token").and_then(Value::as_str) {
            self.refresh_token = Some(rotated.to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

#[derive(Debug, Clone, Deserialize)]
struct ClientSecret {
    client_id: String,
    client_secret: String,
    token_uri: Option<String>,
}

fn read_client_secret(path: &Path) -> Result<ClientSecret> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read Google OAuth client secret file {:?}", path))?;
    let parsed: ClientSecretFile = serde_json::from_str(&content)
        .with_context(|| format!("Invalid Google OAuth client secret file {:?}", path))?;
    parsed
        .installed
        .or(parsed.web)
        .with_context(|| format!("No 'installed' or 'web' client in {:?}", path))
}

/// Returns a bearer token covering `scopes`, refreshing the cache if needed.
pub fn access_token(config: &CollectorConfig, scopes: &[&str]) -> Result<String> {
    let Some(secret_path) = config.google_oauth_client_secret_file.as_deref() else {
        anyhow::bail!("GOOGLE_OAUTH_CLIENT_SECRET_FILE is not configured");
    };
    if !secret_path.exists() {
        anyhow::bail!("Google OAuth client secret file not found: {:?}", secret_path);
    }

    let cache_path = config.google_token_cache.as_path();
    if !cache_path.exists() {
        anyhow::bail!(
            "Google token cache not found at {:?}; run the consent flow to create it",
            cache_path
        );
    }
    let content = fs::read_to_string(cache_path)
        .with_context(|| format!("Failed to read Google token cache {:?}", cache_path))?;
    let mut user: AuthorizedUser = serde_json::from_str(&content)
        .with_context(|| format!("Invalid Google token cache {:?}", cache_path))?;

    if !user.covers(scopes) {
        anyhow::bail!(
            "Google token cache lacks required scopes ({}); rerun the consent flow",
            scopes.join(" ")
        );
    }

    let now = Utc::now();
    if let Some(token) = user.valid_token(now) {
        return Ok(token.to_string());
    }

    let refresh_token = user
        .refresh_token
        .clone()
        .context("Google token expired and no refresh_token is cached")?;
    let secret = read_client_secret(secret_path)?;
    let client_id = user.client_id.clone().unwrap_or(secret.client_id);
    let client_secret = user.client_secret.clone().unwrap_or(secret.client_secret);
    let token_uri = user
        .token_uri
        .clone()
        .or(secret.token_uri)
        .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string());

    info!(action = "refresh", component = "google_auth", "Refreshing Google access token");
    let response = send_json(
        http_client()?.post(&token_uri).form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
        ]),
        "Google token refresh",
    )?;
    user.apply_refresh(&response, now)?;

    if let Some(parent) = cache_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(cache_path, serde_json::to_string(&user)?)
        .with_context(|| format!("Failed to update Google token cache {:?}", cache_path))?;

    user.token.context("Google token refresh produced no token")
}
