//! Admin endpoints: member dashboard, renewal trigger, membership restore.
//!
//! Every endpoint sits behind the bearer admin token. There is no open dev
//! mode — a vault with no admin token configured refuses all admin calls.

use super::AppError;
use crate::credentials::{CredentialStore, CredentialSummary};
use crate::lifecycle::{LifecycleManager, SyncQueue};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared state for the admin router
#[derive(Clone)]
pub struct AdminAppState {
    pub store: Arc<CredentialStore>,
    pub lifecycle: Arc<LifecycleManager>,
    pub queue: SyncQueue,
    /// Required bearer token. None = admin API disabled outright.
    pub admin_token: Option<String>,
}

/// GET /admin/members response
#[derive(Serialize)]
pub struct MembersResponse {
    pub count: u64,
    pub members: Vec<CredentialSummary>,
}

/// POST /admin/restore request body
#[derive(Deserialize)]
pub struct RestoreRequest {
    pub guild_id: String,
}

#[derive(Serialize)]
struct ScheduledResponse {
    status: &'static str,
}

/// Create the admin API router
pub fn create_admin_router(state: AdminAppState) -> Router {
    Router::new()
        .route("/admin/members", get(list_members))
        .route("/admin/sync", post(sync_tokens))
        .route("/admin/restore", post(restore_members))
        .with_state(Arc::new(state))
}

/// Returns true if the bearer token in `Authorization` matches the configured
/// admin token. A vault with no admin token configured rejects everything.
fn validate_admin_token(headers: &HeaderMap, expected: &Option<String>) -> bool {
    let Some(expected_token) = expected else {
        return false;
    };

    let Some(auth_header) = headers.get("Authorization") else {
        return false;
    };
    let Ok(value) = auth_header.to_str() else {
        return false;
    };
    let Some(token) = value.strip_prefix("Bearer ") else {
        return false;
    };

    token == expected_token
}

fn require_admin(headers: &HeaderMap, expected: &Option<String>) -> Result<(), AppError> {
    if validate_admin_token(headers, expected) {
        Ok(())
    } else {
        warn!("Rejected admin request");
        Err(AppError::Unauthorized("Unauthorized".to_string()))
    }
}

/// GET /admin/members — token-free summaries of every stored credential.
async fn list_members(
    State(state): State<Arc<AdminAppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    require_admin(&headers, &state.admin_token)?;

    let records = state
        .store
        .all()
        .map_err(|e| AppError::ServerError(format!("Failed to list members: {}", e)))?;

    let members: Vec<CredentialSummary> = records.iter().map(CredentialSummary::from).collect();

    Ok(Json(MembersResponse {
        count: members.len() as u64,
        members,
    })
    .into_response())
}

/// POST /admin/sync — schedule a renewal batch and acknowledge immediately.
///
/// The batch runs in the background worker; this endpoint never waits on it.
async fn sync_tokens(
    State(state): State<Arc<AdminAppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    require_admin(&headers, &state.admin_token)?;

    if !state.queue.enqueue_renewal() {
        return Err(AppError::ServerError(
            "Renewal worker is not running".to_string(),
        ));
    }

    info!("Renewal batch scheduled via admin API");

    Ok((
        StatusCode::ACCEPTED,
        Json(ScheduledResponse {
            status: "scheduled",
        }),
    )
        .into_response())
}

/// POST /admin/restore — replay every stored credential into a guild.
///
/// Runs synchronously and returns the aggregate counts.
async fn restore_members(
    State(state): State<Arc<AdminAppState>>,
    headers: HeaderMap,
    Json(request): Json<RestoreRequest>,
) -> Result<Response, AppError> {
    require_admin(&headers, &state.admin_token)?;

    let report = state
        .lifecycle
        .replay_all(&request.guild_id)
        .await
        .map_err(|e| AppError::ServerError(format!("Replay failed: {}", e)))?;

    Ok(Json(report).into_response())
}
