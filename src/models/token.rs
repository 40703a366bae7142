// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth token model for storage and the token endpoint.

use serde::{Deserialize, Serialize};

/// The CRM OAuth bearer token.
///
/// Stored as a single row (see `db::SqliteTokenStore`); every save replaces
/// all fields at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub token_type: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry as Unix epoch seconds
    pub expires_at: i64,
    /// Granted OAuth scopes
    pub scope: Vec<String>,
}

impl Token {
    /// Build a stored token from a token endpoint response received at `now`.
    ///
    /// Refresh responses may omit the refresh token or scope; in that case the
    /// values from `previous` are carried over.
    pub fn from_response(response: TokenResponse, now: i64, previous: Option<&Token>) -> Self {
        let expires_at = response
            .expires_at
            .or_else(|| response.expires_in.map(|secs| now + secs))
            .unwrap_or(now);

        let refresh_token = response
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous.map(|p| p.refresh_token.clone()))
            .unwrap_or_default();

        let scope = match response.scope {
            Some(raw) => raw.split_whitespace().map(String::from).collect(),
            None => previous.map(|p| p.scope.clone()).unwrap_or_default(),
        };

        Self {
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
            access_token: response.access_token,
            refresh_token,
            expires_at,
            scope,
        }
    }
}

/// Response body of the CRM token endpoint (both grant types).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Absolute expiry, sent by some providers instead of `expires_in`
    #[serde(default)]
    pub expires_at: Option<i64>,
    /// Space-separated scopes
    #[serde(default)]
    pub scope: Option<String>,
}
