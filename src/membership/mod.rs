//! Guild membership replay client.
//!
//! Wraps the platform's bot-authenticated "add guild member" call: a PUT of
//! the user's access token to the guild-member resource. One bounded call per
//! record, no retries — the lifecycle manager owns batch policy.

use crate::config::PlatformConfig;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;

/// Result of replaying one credential against the membership API.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipOutcome {
    /// The user was added to the guild
    Created,
    /// The user was already a member
    AlreadyMember,
}

/// Membership-replay call failures.
#[derive(Debug)]
pub enum ReplayError {
    /// The request never produced a response (network failure or timeout)
    Request(reqwest::Error),
    /// The platform rejected the add (expired token, missing permission, ...)
    Status(StatusCode, String),
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayError::Request(e) => write!(f, "Membership request failed: {}", e),
            ReplayError::Status(status, body) => {
                write!(f, "Membership add failed with status {}: {}", status, body)
            }
        }
    }
}

impl std::error::Error for ReplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReplayError::Request(e) => Some(e),
            _ => None,
        }
    }
}

/// Seam between the lifecycle manager and the membership API.
#[async_trait]
pub trait MembershipGateway: Send + Sync {
    /// Re-add one identity to `guild_id` using its stored access token.
    async fn add_member(
        &self,
        guild_id: &str,
        identity_id: &str,
        access_token: &str,
    ) -> Result<MembershipOutcome, ReplayError>;
}

/// HTTP client for the platform's guild-member API.
pub struct MembershipClient {
    http_client: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl MembershipClient {
    pub fn new(platform: &PlatformConfig, bot_token: String) -> Self {
        let http_client = reqwest::Client::builder()
            .user_agent("guildvault/0.1")
            .timeout(Duration::from_secs(platform.timeout_seconds))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http_client,
            api_base: platform.api_base.clone(),
            bot_token,
        }
    }
}

/// Map an add-member response status to an outcome.
///
/// 201 = the member was created, 204 = the member was already present;
/// anything else is a failure.
fn outcome_for_status(status: StatusCode) -> Option<MembershipOutcome> {
    match status {
        StatusCode::CREATED => Some(MembershipOutcome::Created),
        StatusCode::NO_CONTENT => Some(MembershipOutcome::AlreadyMember),
        _ => None,
    }
}

#[async_trait]
impl MembershipGateway for MembershipClient {
    async fn add_member(
        &self,
        guild_id: &str,
        identity_id: &str,
        access_token: &str,
    ) -> Result<MembershipOutcome, ReplayError> {
        let url = format!(
            "{}/guilds/{}/members/{}",
            self.api_base, guild_id, identity_id
        );

        let response = self
            .http_client
            .put(&url)
            .header("Authorization", format!("Bot {}", self.bot_token))
            .json(&json!({ "access_token": access_token }))
            .send()
            .await
            .map_err(ReplayError::Request)?;

        let status = response.status();
        match outcome_for_status(status) {
            Some(outcome) => Ok(outcome),
            None => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<failed to read body>".to_string());
                Err(ReplayError::Status(status, body))
            }
        }
    }
}
