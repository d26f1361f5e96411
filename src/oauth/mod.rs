//! OAuth token exchange client.
//!
//! Wraps the platform's two token grants (authorization code and refresh
//! token) plus the identity-profile fetch that capture needs to learn who a
//! token belongs to. Pure request/response: no retries, no state, a bounded
//! per-call timeout so one stalled endpoint cannot hang a whole batch.

mod state;

pub use state::{run_login_state_cleanup, LoginStateManager};

use crate::config::PlatformConfig;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// OAuth scopes requested on login: identify the user and allow the bot to
/// re-add them to guilds.
pub const SCOPES: &str = "identify guilds.join";

/// A successful token grant (initial exchange or refresh).
///
/// All three fields are required: a grant that cannot drive a later renewal
/// is useless to the vault, so a response missing any of them is rejected as
/// malformed rather than stored half-empty.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

/// Identity profile returned by the platform's `/users/@me`.
#[derive(Clone, Debug, Deserialize)]
pub struct IdentityProfile {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Token-exchange call failures.
#[derive(Debug)]
pub enum ExchangeError {
    /// The request never produced a response (network failure or timeout)
    Request(reqwest::Error),
    /// Non-2xx response from the endpoint, with the body for logging
    Status(StatusCode, String),
    /// Response body missing or mistyping a required field
    Malformed(String),
}

impl std::fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeError::Request(e) => write!(f, "Token exchange request failed: {}", e),
            ExchangeError::Status(status, body) => {
                write!(f, "Token exchange failed with status {}: {}", status, body)
            }
            ExchangeError::Malformed(detail) => {
                write!(f, "Malformed token exchange response: {}", detail)
            }
        }
    }
}

impl std::error::Error for ExchangeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExchangeError::Request(e) => Some(e),
            _ => None,
        }
    }
}

/// Seam between the lifecycle manager and the platform's token endpoints.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Exchange an authorization code for a fresh token grant.
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ExchangeError>;

    /// Exchange a refresh token for a fresh token grant.
    async fn exchange_refresh_token(&self, refresh_token: &str)
        -> Result<TokenGrant, ExchangeError>;

    /// Fetch the identity profile the given access token belongs to.
    async fn fetch_profile(&self, access_token: &str) -> Result<IdentityProfile, ExchangeError>;
}

/// HTTP client for the platform's OAuth endpoints.
pub struct ExchangeClient {
    http_client: reqwest::Client,
    token_url: String,
    profile_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl ExchangeClient {
    pub fn new(
        platform: &PlatformConfig,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .user_agent("guildvault/0.1")
            .timeout(Duration::from_secs(platform.timeout_seconds))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http_client,
            token_url: platform.token_url.clone(),
            profile_url: format!("{}/users/@me", platform.api_base),
            client_id,
            client_secret,
            redirect_uri,
        }
    }

    async fn grant_request(
        &self,
        form: HashMap<&str, &str>,
    ) -> Result<TokenGrant, ExchangeError> {
        let response = self
            .http_client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(ExchangeError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(ExchangeError::Status(status, body));
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|e| ExchangeError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl TokenExchanger for ExchangeClient {
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ExchangeError> {
        let mut form = HashMap::new();
        form.insert("grant_type", "authorization_code");
        form.insert("code", code);
        form.insert("redirect_uri", self.redirect_uri.as_str());
        form.insert("client_id", self.client_id.as_str());
        form.insert("client_secret", self.client_secret.as_str());

        tracing::debug!(token_url = %self.token_url, "Exchanging authorization code");
        self.grant_request(form).await
    }

    async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenGrant, ExchangeError> {
        let mut form = HashMap::new();
        form.insert("grant_type", "refresh_token");
        form.insert("refresh_token", refresh_token);
        form.insert("client_id", self.client_id.as_str());
        form.insert("client_secret", self.client_secret.as_str());

        tracing::debug!(token_url = %self.token_url, "Exchanging refresh token");
        self.grant_request(form).await
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<IdentityProfile, ExchangeError> {
        let response = self
            .http_client
            .get(&self.profile_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(ExchangeError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(ExchangeError::Status(status, body));
        }

        response
            .json::<IdentityProfile>()
            .await
            .map_err(|e| ExchangeError::Malformed(e.to_string()))
    }
}

/// Build the provider authorization URL the login redirect sends users to.
pub fn authorize_url(
    authorize_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    state: &str,
) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
        authorize_endpoint,
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(SCOPES),
        urlencoding::encode(state)
    )
}
