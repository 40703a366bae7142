// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// No usable token, or the CRM rejected our credentials.
    /// The authorization flow must be run again.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Non-2xx response from the CRM API other than an auth failure.
    #[error("CRM request failed with HTTP {status}: {body}")]
    UpstreamRequest { status: u16, body: String },

    /// The CRM did not answer within the configured HTTP timeout.
    #[error("CRM request timed out: {0}")]
    UpstreamTimeout(String),

    /// Transport or decoding failure talking to the CRM.
    #[error("CRM API error: {0}")]
    Upstream(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether the failed operation may succeed if simply tried again later.
    ///
    /// Timeouts, rate limiting and CRM server errors are retryable;
    /// authentication failures never are.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::UpstreamTimeout(_) => true,
            AppError::UpstreamRequest { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Map a reqwest transport error, separating timeouts out.
    pub fn from_transport(context: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::UpstreamTimeout(format!("{}: {}", context, err))
        } else {
            AppError::Upstream(format!("{}: {}", context, err))
        }
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Authentication(msg) => (
                StatusCode::UNAUTHORIZED,
                "authentication_required",
                Some(msg.clone()),
            ),
            AppError::UpstreamRequest { status, .. } => (
                StatusCode::BAD_GATEWAY,
                "crm_error",
                Some(format!("CRM returned HTTP {}", status)),
            ),
            AppError::UpstreamTimeout(msg) => {
                (StatusCode::GATEWAY_TIMEOUT, "crm_timeout", Some(msg.clone()))
            }
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "crm_error", Some(msg.clone())),
            AppError::Storage(msg) => {
                tracing::error!(error = %msg, "Storage error");
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", None)
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
