// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Dashboard data and refresh control API.

use crate::error::{AppError, Result};
use crate::models::{DailySummary, DashboardData, Location};
use crate::services::aggregator::{totals_for, Resolution};
use crate::services::refresh::{RefreshInterval, RefreshOutcome, RefreshStatus};
use crate::AppState;
use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/locations", get(get_locations))
        .route("/api/dashboard", get(get_dashboard))
        .route("/api/summary", get(get_summary))
        .route("/api/export.csv", get(export_csv))
        .route("/api/refresh/status", get(get_refresh_status))
        .route("/api/refresh", post(trigger_refresh))
        .route("/api/refresh/interval", put(set_refresh_interval))
}

// ─── Locations ───────────────────────────────────────────────

/// Locations the connected CRM account can see.
async fn get_locations(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Location>>> {
    Ok(Json(state.crm.get_locations().await?))
}

// ─── Dashboard ───────────────────────────────────────────────

#[derive(Deserialize)]
struct DashboardQuery {
    /// `daily`, `weekly` or `monthly`; all resolutions when absent
    range: Option<String>,
    /// Comma-separated location names; `all` or absent for every location
    locations: Option<String>,
}

/// Parse the `locations` filter. `None` means no filtering.
fn parse_location_filter(raw: Option<&str>) -> Option<Vec<String>> {
    let raw = raw?.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("all") {
        return None;
    }
    Some(
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    )
}

fn parse_range(raw: Option<&str>) -> Result<Option<Resolution>> {
    raw.filter(|r| !r.trim().is_empty())
        .map(|r| {
            r.parse::<Resolution>().map_err(|_| {
                AppError::BadRequest(
                    "Invalid 'range' parameter: must be daily, weekly or monthly".to_string(),
                )
            })
        })
        .transpose()
}

/// Keep only the totals for one resolution.
fn retain_resolution(data: &mut DashboardData, resolution: Resolution) {
    if resolution != Resolution::Daily {
        data.daily_totals.clear();
    }
    if resolution != Resolution::Weekly {
        data.weekly_totals.clear();
    }
    if resolution != Resolution::Monthly {
        data.monthly_totals.clear();
    }
}

/// Latest dashboard document, optionally narrowed.
async fn get_dashboard(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DashboardQuery>,
) -> Result<Json<DashboardData>> {
    let resolution = parse_range(params.range.as_deref())?;
    let mut data = state.refresh.latest_dashboard().await?;

    if let Some(names) = parse_location_filter(params.locations.as_deref()) {
        data.retain_locations(&names);
    }
    if let Some(resolution) = resolution {
        retain_resolution(&mut data, resolution);
    }

    tracing::debug!(
        locations = data.locations.len(),
        range = ?resolution,
        "Serving dashboard"
    );
    Ok(Json(data))
}

// ─── Daily Summary ───────────────────────────────────────────

#[derive(Deserialize)]
struct SummaryQuery {
    /// `YYYY-MM-DD`; defaults to yesterday (UTC)
    date: Option<String>,
}

async fn get_summary(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SummaryQuery>,
) -> Result<Json<DailySummary>> {
    let date = match params.date.as_deref() {
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
            AppError::BadRequest("Invalid 'date' parameter: must be YYYY-MM-DD".to_string())
        })?,
        None => (Utc::now() - Duration::days(1)).date_naive(),
    };

    Ok(Json(state.refresh.daily_summary(date).await?))
}

// ─── CSV Export ──────────────────────────────────────────────

#[derive(Deserialize)]
struct ExportQuery {
    range: Option<String>,
    locations: Option<String>,
}

const CSV_HEADER: [&str; 5] = [
    "period",
    "location",
    "retail_sales",
    "rental_sales",
    "total_sales",
];

#[derive(Serialize)]
struct CsvRow<'a> {
    period: &'a str,
    location: &'a str,
    retail_sales: f64,
    rental_sales: f64,
    total_sales: f64,
}

/// One row per location and period: `period,location,retail,rental,total`.
///
/// The header is always written, even with no rows.
pub fn dashboard_to_csv(data: &DashboardData, resolution: Resolution) -> Result<String> {
    let csv_error = |e: csv::Error| AppError::Internal(anyhow::anyhow!("CSV write failed: {}", e));

    let totals = totals_for(data, resolution);
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(CSV_HEADER).map_err(csv_error)?;

    for location in &data.locations {
        let Some(channels) = totals.get(location) else {
            continue;
        };
        let periods: BTreeSet<&String> =
            channels.retail.keys().chain(channels.rental.keys()).collect();

        for period in periods {
            let retail = channels.retail.get(period).copied().unwrap_or(0.0);
            let rental = channels.rental.get(period).copied().unwrap_or(0.0);
            writer
                .serialize(CsvRow {
                    period,
                    location,
                    retail_sales: retail,
                    rental_sales: rental,
                    total_sales: retail + rental,
                })
                .map_err(csv_error)?;
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("CSV flush failed: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| AppError::Internal(e.into()))
}

async fn export_csv(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ExportQuery>,
) -> Result<impl IntoResponse> {
    let resolution = parse_range(params.range.as_deref())?.unwrap_or(Resolution::Daily);
    let mut data = state.refresh.latest_dashboard().await?;
    if let Some(names) = parse_location_filter(params.locations.as_deref()) {
        data.retain_locations(&names);
    }

    let body = dashboard_to_csv(&data, resolution)?;
    let filename = format!(
        "attachment; filename=\"pipeline_{}_{}.csv\"",
        resolution,
        Utc::now().format("%Y%m%d")
    );

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, filename),
        ],
        body,
    ))
}

// ─── Refresh Control ─────────────────────────────────────────

async fn get_refresh_status(State(state): State<Arc<AppState>>) -> Json<RefreshStatus> {
    Json(state.refresh.get_status().await)
}

/// Run a refresh now and wait for it.
async fn trigger_refresh(State(state): State<Arc<AppState>>) -> Result<Json<RefreshOutcome>> {
    tracing::info!("Manual data refresh triggered");
    Ok(Json(state.refresh.refresh_data().await?))
}

#[derive(Deserialize)]
struct IntervalRequest {
    interval: String,
}

async fn set_refresh_interval(
    State(state): State<Arc<AppState>>,
    Json(body): Json<IntervalRequest>,
) -> Result<Json<RefreshStatus>> {
    let interval: RefreshInterval = body.interval.parse()?;
    state.refresh.set_refresh_interval(interval).await?;
    Ok(Json(state.refresh.get_status().await))
}
