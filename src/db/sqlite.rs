// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! SQLite-backed token store.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;

use crate::db::{tables, TokenStore};
use crate::error::AppError;
use crate::models::Token;

/// Open (creating if needed) the SQLite database at `path`.
pub async fn create_pool(path: &Path) -> Result<SqlitePool, AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            AppError::Storage(format!("Failed to create {}: {}", parent.display(), e))
        })?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .map_err(|e| AppError::Storage(format!("Failed to open {}: {}", path.display(), e)))?;

    tracing::info!(path = %path.display(), "Opened token database");
    Ok(pool)
}

/// Token store over a single-row `tokens` table.
#[derive(Clone)]
pub struct SqliteTokenStore {
    pool: SqlitePool,
}

impl SqliteTokenStore {
    /// Wrap a pool and make sure the table exists.
    pub async fn new(pool: SqlitePool) -> Result<Self, AppError> {
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Private in-memory database, for tests and dry runs.
    pub async fn in_memory() -> Result<Self, AppError> {
        // Every connection to :memory: is its own database, so pin the pool to one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        Self::new(pool).await
    }

    async fn init(&self) -> Result<(), AppError> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY,
                token_type TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                scope TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            tables::TOKENS
        );

        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to create tokens table: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn load(&self) -> Result<Option<Token>, AppError> {
        let sql = format!(
            "SELECT token_type, access_token, refresh_token, expires_at, scope FROM {} WHERE id = ?1",
            tables::TOKENS
        );

        let row = sqlx::query(&sql)
            .bind(tables::TOKEN_ROW_ID)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;

        let Some(row) = row else {
            tracing::debug!("No token found in database");
            return Ok(None);
        };

        let scope_json: String = row
            .try_get("scope")
            .map_err(|e| AppError::Storage(e.to_string()))?;
        let scope = serde_json::from_str(&scope_json).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Stored token scope is not a JSON list, ignoring");
            Vec::new()
        });

        let token = Token {
            token_type: row
                .try_get("token_type")
                .map_err(|e| AppError::Storage(e.to_string()))?,
            access_token: row
                .try_get("access_token")
                .map_err(|e| AppError::Storage(e.to_string()))?,
            refresh_token: row
                .try_get("refresh_token")
                .map_err(|e| AppError::Storage(e.to_string()))?,
            expires_at: row
                .try_get("expires_at")
                .map_err(|e| AppError::Storage(e.to_string()))?,
            scope,
        };

        Ok(Some(token))
    }

    async fn save(&self, token: &Token) -> Result<(), AppError> {
        let scope_json = serde_json::to_string(&token.scope)
            .map_err(|e| AppError::Storage(format!("Failed to encode scope: {}", e)))?;
        let now = crate::time_utils::now_epoch_seconds();

        // Single upsert statement: readers never observe a half-written row.
        let sql = format!(
            "INSERT INTO {} (id, token_type, access_token, refresh_token, expires_at, scope, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(id) DO UPDATE SET
                token_type = excluded.token_type,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                scope = excluded.scope,
                updated_at = excluded.updated_at",
            tables::TOKENS
        );

        sqlx::query(&sql)
            .bind(tables::TOKEN_ROW_ID)
            .bind(&token.token_type)
            .bind(&token.access_token)
            .bind(&token.refresh_token)
            .bind(token.expires_at)
            .bind(scope_json)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to save token: {}", e)))?;

        tracing::info!("Token saved to database");
        Ok(())
    }

    async fn delete(&self) -> Result<(), AppError> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", tables::TOKENS);
        sqlx::query(&sql)
            .bind(tables::TOKEN_ROW_ID)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to delete token: {}", e)))?;

        tracing::info!("Token deleted from database");
        Ok(())
    }
}
