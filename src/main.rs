// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Pipeline Dashboard API Server
//!
//! Keeps the CRM OAuth token fresh, refreshes pipeline data on a timer and
//! serves the dashboard documents.

use pipeline_dashboard::{
    config::Config,
    db::{create_pool, SqliteTokenStore},
    services::{CrmClient, CrmService, PipelineCollector, RefreshManager, TokenManager},
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, "Starting Pipeline Dashboard API");

    // Token storage
    let pool = create_pool(&config.database_path).await?;
    let store = Arc::new(SqliteTokenStore::new(pool).await?);

    // CRM client doubles as the OAuth token endpoint
    let client = CrmClient::new(&config)?;
    let tokens = Arc::new(TokenManager::load(&config, Arc::new(client.clone()), store).await?);
    if !tokens.is_token_valid().await {
        tracing::warn!("No valid token yet; visit /oauth/authorize to connect the CRM");
    }

    let crm = CrmService::new(client, tokens.clone());

    // Data refresh
    let collector = Arc::new(PipelineCollector::new(crm.clone(), &config));
    let refresh = Arc::new(
        RefreshManager::new(collector, &config.data_dir, config.refresh_interval).await?,
    );
    refresh.start().await;
    tracing::info!(
        interval = %config.refresh_interval,
        data_dir = %config.data_dir.display(),
        "Data refresh started"
    );

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        tokens,
        crm,
        refresh: refresh.clone(),
    });

    // Build router
    let app = pipeline_dashboard::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    refresh.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pipeline_dashboard=debug,info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .init();
}
