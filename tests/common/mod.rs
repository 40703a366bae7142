// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipeline_dashboard::config::Config;
use pipeline_dashboard::db::{SqliteTokenStore, TokenStore};
use pipeline_dashboard::error::AppError;
use pipeline_dashboard::models::{PipelineData, Token, TokenResponse};
use pipeline_dashboard::routes::create_router;
use pipeline_dashboard::services::{
    CrmClient, CrmService, PipelineSource, RefreshManager, TokenEndpoint, TokenManager,
};
use pipeline_dashboard::time_utils::now_epoch_seconds;
use pipeline_dashboard::AppState;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A token that expires `secs` from now.
#[allow(dead_code)]
pub fn token_expiring_in(secs: i64) -> Token {
    Token {
        token_type: "Bearer".to_string(),
        access_token: "old_access".to_string(),
        refresh_token: "old_refresh".to_string(),
        expires_at: now_epoch_seconds() + secs,
        scope: vec!["contacts.readonly".to_string()],
    }
}

/// In-process token endpoint counting its calls.
pub struct FakeTokenEndpoint {
    pub refresh_calls: AtomicUsize,
    pub exchange_calls: AtomicUsize,
    /// HTTP status the endpoint "answers" with; non-2xx is a rejection
    pub status: u16,
    /// Simulated round trip, to let concurrent callers pile up
    pub latency: Duration,
}

#[allow(dead_code)]
impl FakeTokenEndpoint {
    pub fn ok() -> Self {
        Self {
            refresh_calls: AtomicUsize::new(0),
            exchange_calls: AtomicUsize::new(0),
            status: 200,
            latency: Duration::from_millis(20),
        }
    }

    pub fn rejecting(status: u16) -> Self {
        Self {
            status,
            ..Self::ok()
        }
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn exchange_count(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    async fn answer(&self, access: &str) -> Result<TokenResponse, AppError> {
        tokio::time::sleep(self.latency).await;
        if !(200..300).contains(&self.status) {
            return Err(AppError::Authentication(format!(
                "Token request failed with status {}",
                self.status
            )));
        }
        Ok(TokenResponse {
            access_token: access.to_string(),
            refresh_token: Some("new_refresh".to_string()),
            token_type: Some("Bearer".to_string()),
            expires_in: Some(86_399),
            expires_at: None,
            scope: Some("locations.readonly contacts.readonly".to_string()),
        })
    }
}

#[async_trait]
impl TokenEndpoint for FakeTokenEndpoint {
    async fn exchange_code(&self, _code: &str) -> Result<TokenResponse, AppError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        self.answer("exchanged_access").await
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenResponse, AppError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.answer("refreshed_access").await
    }
}

/// Token store whose writes always fail.
#[allow(dead_code)]
pub struct ReadOnlyStore {
    pub token: Mutex<Option<Token>>,
}

#[async_trait]
impl TokenStore for ReadOnlyStore {
    async fn load(&self) -> Result<Option<Token>, AppError> {
        Ok(self.token.lock().unwrap().clone())
    }

    async fn save(&self, _token: &Token) -> Result<(), AppError> {
        Err(AppError::Storage("disk full".to_string()))
    }

    async fn delete(&self) -> Result<(), AppError> {
        Err(AppError::Storage("disk full".to_string()))
    }
}

/// Pipeline source returning canned data.
pub struct FakeSource {
    pub data: PipelineData,
    pub calls: AtomicUsize,
    pub latency: Duration,
}

#[allow(dead_code)]
impl FakeSource {
    pub fn new(data: PipelineData) -> Self {
        Self {
            data,
            calls: AtomicUsize::new(0),
            latency: Duration::ZERO,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PipelineSource for FakeSource {
    async fn collect(&self, _now: DateTime<Utc>) -> Result<PipelineData, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        Ok(self.data.clone())
    }
}

/// Raw data for two locations with a couple of sales each.
#[allow(dead_code)]
pub fn sample_pipeline_data() -> PipelineData {
    use pipeline_dashboard::models::{Contact, LocationPipelineData};
    use serde_json::json;

    PipelineData {
        start_date: "2024-12-20".to_string(),
        end_date: "2025-01-19".to_string(),
        locations: vec![
            LocationPipelineData {
                name: "Augusta".to_string(),
                location_id: "loc_a".to_string(),
                sold_retail: vec![
                    json!({"monetaryValue": 100, "closedDate": "2025-01-01"}),
                    json!({"monetaryValue": "50", "closedDate": "2025-01-01T15:00:00Z"}),
                ],
                sold_rental: vec![json!({"monetaryValue": 200, "closedDate": "2025-01-02"})],
                contacts: vec![
                    Contact {
                        created_at: Some("2025-01-01T10:00:00Z".to_string()),
                        last_contacted_date: Some("2025-01-01T10:10:00Z".to_string()),
                        ..Default::default()
                    },
                    Contact {
                        created_at: Some("2025-01-01T11:00:00Z".to_string()),
                        ..Default::default()
                    },
                ],
            },
            LocationPipelineData {
                name: "Macon".to_string(),
                location_id: "loc_m".to_string(),
                sold_retail: vec![json!({"monetaryValue": 75.5, "closedDate": "2025-01-02"})],
                ..Default::default()
            },
        ],
    }
}

/// Create a test app over fakes, writing documents into `data_dir`.
/// Returns the router and the shared state.
#[allow(dead_code)]
pub async fn create_test_app(
    data_dir: &Path,
    source: Arc<FakeSource>,
    endpoint: Arc<FakeTokenEndpoint>,
) -> (axum::Router, Arc<AppState>) {
    let config = Config {
        data_dir: data_dir.to_path_buf(),
        ..Config::default()
    };

    let store = Arc::new(SqliteTokenStore::in_memory().await.unwrap());
    let tokens = Arc::new(TokenManager::load(&config, endpoint, store).await.unwrap());
    let crm = CrmService::new(CrmClient::new(&config).unwrap(), tokens.clone());
    let refresh = Arc::new(
        RefreshManager::new(source, data_dir, config.refresh_interval)
            .await
            .unwrap(),
    );

    let state = Arc::new(AppState {
        config,
        tokens,
        crm,
        refresh,
    });

    (create_router(state.clone()), state)
}
