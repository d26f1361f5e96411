//! Public capture flow.
//!
//! 1. GET /login → redirect to the provider authorization page with a
//!    single-use state
//! 2. User authorizes on the provider's site
//! 3. Provider redirects back to GET /callback with code + state
//! 4. Code is exchanged and the credential upserted; the caller sees the
//!    captured identity (or a verification failure, with nothing written)

use super::AppError;
use crate::lifecycle::{CaptureError, LifecycleManager};
use crate::oauth::{authorize_url, LoginStateManager};
use axum::{
    extract::{ConnectInfo, Query, State},
    response::{IntoResponse, Json, Redirect, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared state for the capture router
#[derive(Clone)]
pub struct CaptureAppState {
    pub lifecycle: Arc<LifecycleManager>,
    pub login_states: LoginStateManager,
    /// Provider authorization endpoint the login redirect points at
    pub authorize_endpoint: String,
    pub client_id: String,
    pub redirect_uri: String,
}

/// Provider callback query parameters
#[derive(Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Successful capture response
#[derive(Serialize)]
pub struct CaptureSuccessResponse {
    success: bool,
    identity_id: String,
    display_name: String,
}

/// Create the public capture router
pub fn create_capture_router(state: CaptureAppState) -> Router {
    Router::new()
        .route("/login", get(login))
        .route("/callback", get(callback))
        .with_state(Arc::new(state))
}

/// GET /login
///
/// Mints a single-use CSRF state and redirects to the provider.
async fn login(State(state): State<Arc<CaptureAppState>>) -> Redirect {
    let login_state = state.login_states.create_state();
    let url = authorize_url(
        &state.authorize_endpoint,
        &state.client_id,
        &state.redirect_uri,
        &login_state,
    );

    debug!("Redirecting to provider authorization page");
    Redirect::temporary(&url)
}

/// GET /callback?code&state
///
/// Exchanges the authorization code and stores the captured identity.
/// A failed exchange surfaces as a verification failure; nothing is written.
async fn callback(
    State(state): State<Arc<CaptureAppState>>,
    origin: Option<ConnectInfo<SocketAddr>>,
    Query(params): Query<CallbackParams>,
) -> Result<Response, AppError> {
    if let Some(error) = params.error {
        let description = params
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(error = %error, description = %description, "Provider reported authorization failure");
        return Err(AppError::BadRequest(format!(
            "Authorization failed: {} - {}",
            error, description
        )));
    }

    let code = params
        .code
        .ok_or_else(|| AppError::BadRequest("Missing 'code' parameter".to_string()))?;
    let login_state = params
        .state
        .ok_or_else(|| AppError::BadRequest("Missing 'state' parameter".to_string()))?;

    if !state.login_states.validate_and_consume(&login_state) {
        warn!("Invalid or expired login state");
        return Err(AppError::Unauthorized(
            "Invalid or expired login state".to_string(),
        ));
    }

    let origin_address = origin.map(|ConnectInfo(addr)| addr.ip().to_string());

    let captured = state
        .lifecycle
        .capture(&code, origin_address)
        .await
        .map_err(|e| match e {
            CaptureError::Exchange(inner) => {
                warn!(error = %inner, "Token exchange failed");
                AppError::BadGateway("Failed to verify. Please try again.".to_string())
            }
            CaptureError::Store(inner) => {
                warn!(error = %inner, "Failed to store captured credential");
                AppError::ServerError("Failed to store credential".to_string())
            }
        })?;

    info!(identity_id = %captured.identity_id, "Capture flow completed");

    Ok(Json(CaptureSuccessResponse {
        success: true,
        identity_id: captured.identity_id,
        display_name: captured.display_name,
    })
    .into_response())
}
