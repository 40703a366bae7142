// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Pipeline Dashboard: sales pipeline and lead response tracking for a
//! multi-location CRM account.
//!
//! This crate keeps an OAuth token to the CRM alive, periodically collects
//! retail and rental opportunities plus contacts for each tracked location,
//! and serves the aggregated dashboard documents over HTTP.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use services::{CrmService, RefreshManager, TokenManager};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub tokens: Arc<TokenManager>,
    pub crm: CrmService,
    pub refresh: Arc<RefreshManager>,
}
