//! HTTP API.
//!
//! Two thin surfaces over the lifecycle manager: the public capture flow
//! (`/login`, `/callback`) and the bearer-gated admin endpoints. JSON in and
//! out; no HTML is rendered here.

pub mod admin;
pub mod capture;

pub use admin::{create_admin_router, AdminAppState};
pub use capture::{create_capture_router, CaptureAppState};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types for the API surfaces
pub(crate) enum AppError {
    BadRequest(String),
    Unauthorized(String),
    ServerError(String),
    BadGateway(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}
