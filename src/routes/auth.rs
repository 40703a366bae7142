// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! CRM OAuth authorization routes.

use axum::{
    extract::{Query, State},
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};
use crate::time_utils::now_epoch_seconds;
use crate::AppState;

// Type alias for HMAC-SHA256
type HmacSha256 = Hmac<Sha256>;

/// How long an issued `state` stays acceptable.
const STATE_MAX_AGE_SECS: i64 = 10 * 60;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/oauth/authorize", get(authorize))
        .route("/oauth/callback", get(callback))
        .route("/oauth/logout", post(logout))
}

/// Query parameters for starting the OAuth flow.
#[derive(Deserialize)]
pub struct AuthorizeParams {
    /// Local path to land on afterwards. Defaults to `/`.
    #[serde(default)]
    return_to: Option<String>,
}

/// Only same-site absolute paths are accepted as a return target.
fn sanitize_return_to(raw: Option<&str>) -> String {
    match raw {
        Some(path) if path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') => {
            path.to_string()
        }
        Some(other) => {
            tracing::warn!(return_to = %other, "Ignoring non-local return path");
            "/".to_string()
        }
        None => "/".to_string(),
    }
}

fn state_signature(payload: &str, key: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Encode `return_to|issued_at_hex|signature_hex` as URL-safe base64.
fn sign_state(return_to: &str, issued_at: i64, key: &[u8]) -> Result<String> {
    let payload = format!("{}|{:x}", return_to, issued_at);
    let signature = state_signature(&payload, key)?;
    let signed = format!("{}|{}", payload, hex::encode(signature));
    Ok(URL_SAFE_NO_PAD.encode(signed.as_bytes()))
}

/// Verify signature and age of a `state`, returning its return path.
fn verify_state(state: &str, key: &[u8], now: i64) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(state).ok()?;
    let decoded = String::from_utf8(bytes).ok()?;

    // The return path may itself contain '|', so split from the right
    let mut parts = decoded.rsplitn(3, '|');
    let signature_hex = parts.next()?;
    let issued_hex = parts.next()?;
    let return_to = parts.next()?;

    let payload = format!("{}|{}", return_to, issued_hex);
    let expected = state_signature(&payload, key).ok()?;
    let provided = hex::decode(signature_hex).ok()?;

    if !bool::from(expected.ct_eq(&provided)) {
        tracing::error!("OAuth state signature mismatch! Potential tampering.");
        return None;
    }

    let issued_at = i64::from_str_radix(issued_hex, 16).ok()?;
    if now - issued_at > STATE_MAX_AGE_SECS || issued_at > now + 60 {
        tracing::warn!(issued_at, "OAuth state expired");
        return None;
    }

    Some(return_to.to_string())
}

/// Start OAuth flow - redirect to the CRM consent page.
async fn authorize(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuthorizeParams>,
) -> Result<Redirect> {
    let return_to = sanitize_return_to(params.return_to.as_deref());
    let oauth_state = sign_state(&return_to, now_epoch_seconds(), &state.config.oauth_state_key)?;
    let auth_url = state.tokens.authorization_url(&oauth_state);

    tracing::info!(
        client_id = %state.config.client_id,
        return_to = %return_to,
        "Starting OAuth flow, redirecting to CRM"
    );

    Ok(Redirect::temporary(&auth_url))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    state: String,
    #[serde(default)]
    error: Option<String>,
}

/// OAuth callback - exchange the code, store the token, kick off a refresh.
async fn callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect> {
    let return_to = verify_state(&params.state, &state.config.oauth_state_key, now_epoch_seconds())
        .ok_or_else(|| AppError::BadRequest("Invalid or expired OAuth state".to_string()))?;

    // Check for OAuth errors
    if let Some(error) = params.error {
        tracing::warn!(error = %error, "OAuth error from CRM");
        let redirect = format!("{}?error={}", return_to, urlencoding::encode(&error));
        return Ok(Redirect::temporary(&redirect));
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing authorization code".to_string()))?;

    tracing::info!("Exchanging authorization code for tokens");
    state.tokens.exchange_authorization_code(&code).await?;

    // Populate the dashboard right away rather than waiting for the next tick
    let refresh = state.refresh.clone();
    tokio::spawn(async move {
        if let Err(e) = refresh.refresh_data().await {
            tracing::warn!(error = %e, "Post-authorization refresh failed");
        }
    });

    Ok(Redirect::temporary(&return_to))
}

#[derive(Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

/// Forget the stored token.
async fn logout(State(state): State<Arc<AppState>>) -> Result<Json<LogoutResponse>> {
    state.tokens.clear().await?;
    tracing::info!("Stored CRM token deleted");
    Ok(Json(LogoutResponse { success: true }))
}
