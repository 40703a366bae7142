// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Storage layer: the OAuth token row (SQLite) and output documents (files).

pub mod files;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::Token;

pub use sqlite::{create_pool, SqliteTokenStore};

/// Table names and fixed keys.
pub mod tables {
    pub const TOKENS: &str = "tokens";
    /// The token table holds one logical row under this id.
    pub const TOKEN_ROW_ID: i64 = 1;
}

/// Durable home of the single OAuth token.
///
/// `save` replaces every field in one write, so a concurrent `load` sees
/// either the old token or the new one.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<Token>, AppError>;
    async fn save(&self, token: &Token) -> Result<(), AppError>;
    async fn delete(&self) -> Result<(), AppError>;
}
