// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth token lifecycle: acquire, persist, refresh, reuse.
//!
//! `TokenManager::get_valid_token()` is the guard every outgoing CRM request
//! goes through. It hands back the cached token while it is good for at least
//! the safety margin and otherwise refreshes it, with a single refresh in
//! flight at a time.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::config::Config;
use crate::db::TokenStore;
use crate::error::AppError;
use crate::models::{Token, TokenResponse};
use crate::time_utils::now_epoch_seconds;

/// Margin before token expiration when we proactively refresh (5 minutes).
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Read-only scopes requested during authorization.
pub const OAUTH_SCOPES: &[&str] = &[
    "locations.readonly",
    "opportunities.readonly",
    "contacts.readonly",
];

/// The CRM's OAuth token endpoint.
///
/// Implementations map any rejection from the endpoint (non-2xx) to
/// `AppError::Authentication`.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// `grant_type=authorization_code`
    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, AppError>;
    /// `grant_type=refresh_token`
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, AppError>;
}

/// Whether `token` is still usable at `now` with the safety margin to spare.
pub fn is_token_valid_at(token: &Token, now: i64) -> bool {
    now < token.expires_at - TOKEN_REFRESH_MARGIN_SECS
}

/// Owns the one OAuth token of this deployment.
pub struct TokenManager {
    endpoint: Arc<dyn TokenEndpoint>,
    store: Arc<dyn TokenStore>,
    /// Last token read from or written to the store.
    current: RwLock<Option<Token>>,
    /// Serializes refreshes and code exchanges.
    refresh_lock: Mutex<()>,
    client_id: String,
    authorize_url: String,
    redirect_uri: String,
}

impl TokenManager {
    /// Create a manager, loading any token already in `store`.
    pub async fn load(
        config: &Config,
        endpoint: Arc<dyn TokenEndpoint>,
        store: Arc<dyn TokenStore>,
    ) -> Result<Self, AppError> {
        let current = store.load().await?;
        match &current {
            Some(token) => tracing::info!(expires_at = token.expires_at, "Loaded stored token"),
            None => tracing::info!("No stored token; authorization required"),
        }

        Ok(Self {
            endpoint,
            store,
            current: RwLock::new(current),
            refresh_lock: Mutex::new(()),
            client_id: config.client_id.clone(),
            authorize_url: config.authorize_url.clone(),
            redirect_uri: config.redirect_uri.clone(),
        })
    }

    /// CRM consent page URL for the authorization-code flow.
    pub fn authorization_url(&self, state: &str) -> String {
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            self.authorize_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&OAUTH_SCOPES.join(" ")),
            urlencoding::encode(state),
        )
    }

    /// Whether the cached token is usable without a refresh.
    pub async fn is_token_valid(&self) -> bool {
        self.current
            .read()
            .await
            .as_ref()
            .is_some_and(|t| is_token_valid_at(t, now_epoch_seconds()))
    }

    /// Return a token valid for at least the safety margin, refreshing first
    /// if needed.
    pub async fn get_valid_token(&self) -> Result<Token, AppError> {
        // Fast path: no locking beyond a read
        if let Some(token) = self.current.read().await.as_ref() {
            if is_token_valid_at(token, now_epoch_seconds()) {
                return Ok(token.clone());
            }
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        let token = self.current_or_stored().await?.ok_or_else(|| {
            AppError::Authentication(
                "No token stored; complete the authorization flow first".to_string(),
            )
        })?;

        if is_token_valid_at(&token, now_epoch_seconds()) {
            return Ok(token);
        }

        tracing::info!(
            expires_at = token.expires_at,
            "Access token expired or expiring soon, refreshing"
        );
        self.refresh_locked(token).await
    }

    /// Exchange the stored refresh token for a new token pair.
    ///
    /// On failure the stored token is left as it was.
    pub async fn refresh(&self) -> Result<Token, AppError> {
        let _guard = self.refresh_lock.lock().await;

        let token = self.current_or_stored().await?.ok_or_else(|| {
            AppError::Authentication("No token to refresh".to_string())
        })?;
        self.refresh_locked(token).await
    }

    /// Complete the authorization-code grant and store the resulting token.
    pub async fn exchange_authorization_code(&self, code: &str) -> Result<Token, AppError> {
        let _guard = self.refresh_lock.lock().await;

        let response = self.endpoint.exchange_code(code).await?;
        let token = Token::from_response(response, now_epoch_seconds(), None);
        if token.refresh_token.is_empty() {
            tracing::warn!("Token endpoint returned no refresh token; automatic refresh unavailable");
        }

        let token = self.persist(token).await?;
        tracing::info!(expires_at = token.expires_at, "Authorization code exchanged");
        Ok(token)
    }

    /// Forget the token (logout). The next API call requires re-authorization.
    pub async fn clear(&self) -> Result<(), AppError> {
        let _guard = self.refresh_lock.lock().await;
        self.store.delete().await?;
        *self.current.write().await = None;
        Ok(())
    }

    async fn current_or_stored(&self) -> Result<Option<Token>, AppError> {
        if let Some(token) = self.current.read().await.clone() {
            return Ok(Some(token));
        }

        let stored = self.store.load().await?;
        if stored.is_some() {
            *self.current.write().await = stored.clone();
        }
        Ok(stored)
    }

    /// Refresh `previous`. Caller must hold `refresh_lock`.
    async fn refresh_locked(&self, previous: Token) -> Result<Token, AppError> {
        if previous.refresh_token.is_empty() {
            return Err(AppError::Authentication(
                "Stored token has no refresh token".to_string(),
            ));
        }

        let response = self
            .endpoint
            .refresh_token(&previous.refresh_token)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Token refresh failed"))?;

        let token = Token::from_response(response, now_epoch_seconds(), Some(&previous));
        let token = self.persist(token).await?;
        tracing::info!(expires_at = token.expires_at, "Token refreshed");
        Ok(token)
    }

    /// Save to the store, then publish in memory. A failed save leaves the
    /// in-memory token untouched.
    async fn persist(&self, token: Token) -> Result<Token, AppError> {
        if let Err(e) = self.store.save(&token).await {
            tracing::error!(error = %e, "Failed to persist token");
            return Err(e);
        }
        *self.current.write().await = Some(token.clone());
        Ok(token)
    }
}
