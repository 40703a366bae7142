// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Periodic data refresh.
//!
//! One background task collects pipeline data on a timer (hourly, or daily
//! at midnight UTC), folds it into the dashboard document and writes the
//! output files. The interval and last refresh time survive restarts via
//! `refresh_status.json`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::db::files::{read_json, write_json_atomic};
use crate::error::AppError;
use crate::models::{DailySummary, DashboardData};
use crate::services::aggregator::{build_dashboard_data, summarize_day};
use crate::services::collector::PipelineSource;
use crate::time_utils::format_utc_rfc3339;

pub const DASHBOARD_FILE: &str = "dashboard_data.json";
pub const RAW_DATA_FILE: &str = "raw_pipeline_data.json";
pub const STATUS_FILE: &str = "refresh_status.json";

/// How long `stop` waits for the background task to wind down.
const STOP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// `daily_summary_YYYY-MM-DD.json`
pub fn daily_summary_file(date: &str) -> String {
    format!("daily_summary_{}.json", date)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshInterval {
    /// Every hour from when the timer starts
    Hourly,
    /// Every day at 00:00 UTC
    Daily,
}

impl RefreshInterval {
    /// When the next scheduled refresh falls, strictly after `now`.
    pub fn next_run_after(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            RefreshInterval::Hourly => now + Duration::hours(1),
            RefreshInterval::Daily => {
                let tomorrow = now.date_naive() + Duration::days(1);
                tomorrow.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc()
            }
        }
    }
}

impl fmt::Display for RefreshInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshInterval::Hourly => write!(f, "hourly"),
            RefreshInterval::Daily => write!(f, "daily"),
        }
    }
}

impl FromStr for RefreshInterval {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Ok(RefreshInterval::Hourly),
            "daily" => Ok(RefreshInterval::Daily),
            other => Err(AppError::BadRequest(format!(
                "Invalid refresh interval '{}': must be 'hourly' or 'daily'",
                other
            ))),
        }
    }
}

/// Contents of `refresh_status.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedStatus {
    refresh_interval: RefreshInterval,
    last_refresh: Option<String>,
}

/// Snapshot reported by `GET /api/refresh/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshStatus {
    pub running: bool,
    pub refresh_interval: RefreshInterval,
    pub last_refresh: Option<String>,
    /// Only set while the timer is running
    pub next_refresh: Option<String>,
    /// A refresh is executing right now
    pub in_flight: bool,
}

/// What a completed refresh produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshReport {
    pub refreshed_at: String,
    pub locations: usize,
    pub summary_date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RefreshOutcome {
    Completed(RefreshReport),
    /// Another refresh was already running
    Skipped,
}

struct Scheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct State {
    refresh_interval: RefreshInterval,
    last_refresh: Option<String>,
    next_refresh: Option<DateTime<Utc>>,
    scheduler: Option<Scheduler>,
}

pub struct RefreshManager {
    source: Arc<dyn PipelineSource>,
    data_dir: PathBuf,
    state: Mutex<State>,
    /// Held for the duration of a refresh; overlapping runs are skipped.
    refresh_guard: Mutex<()>,
    latest: RwLock<Option<DashboardData>>,
}

impl RefreshManager {
    /// Create a manager writing into `data_dir`.
    ///
    /// A previously saved status file wins over `default_interval`.
    pub async fn new(
        source: Arc<dyn PipelineSource>,
        data_dir: &Path,
        default_interval: RefreshInterval,
    ) -> Result<Self, AppError> {
        tokio::fs::create_dir_all(data_dir).await.map_err(|e| {
            AppError::Storage(format!("Failed to create {}: {}", data_dir.display(), e))
        })?;

        let status_path = data_dir.join(STATUS_FILE);
        let persisted = match read_json::<PersistedStatus>(&status_path).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable refresh status");
                None
            }
        };

        let manager = Self {
            source,
            data_dir: data_dir.to_path_buf(),
            state: Mutex::new(State {
                refresh_interval: persisted
                    .as_ref()
                    .map_or(default_interval, |s| s.refresh_interval),
                last_refresh: persisted.as_ref().and_then(|s| s.last_refresh.clone()),
                next_refresh: None,
                scheduler: None,
            }),
            refresh_guard: Mutex::new(()),
            latest: RwLock::new(None),
        };

        if persisted.is_none() {
            let state = manager.state.lock().await;
            manager.save_status(&state).await?;
        }

        Ok(manager)
    }

    /// Run one refresh now: collect, aggregate, write output files.
    ///
    /// Returns `Skipped` without doing anything if a refresh is in flight.
    pub async fn refresh_data(&self) -> Result<RefreshOutcome, AppError> {
        let Ok(_guard) = self.refresh_guard.try_lock() else {
            tracing::info!("Refresh already in progress, skipping");
            return Ok(RefreshOutcome::Skipped);
        };

        tracing::info!("Starting data refresh");
        let now = Utc::now();

        let raw = self.source.collect(now).await?;
        let dashboard = build_dashboard_data(&raw, now);
        let summary_day = (now - Duration::days(1)).date_naive();
        let summary = summarize_day(&dashboard, summary_day);

        write_json_atomic(&self.data_dir.join(RAW_DATA_FILE), &raw).await?;
        write_json_atomic(&self.data_dir.join(DASHBOARD_FILE), &dashboard).await?;
        write_json_atomic(
            &self.data_dir.join(daily_summary_file(&summary.date)),
            &summary,
        )
        .await?;

        let report = RefreshReport {
            refreshed_at: dashboard.last_updated.clone(),
            locations: dashboard.locations.len(),
            summary_date: summary.date.clone(),
        };
        *self.latest.write().await = Some(dashboard);

        {
            let mut state = self.state.lock().await;
            state.last_refresh = Some(report.refreshed_at.clone());
            self.save_status(&state).await?;
        }

        tracing::info!(
            refreshed_at = %report.refreshed_at,
            locations = report.locations,
            "Data refresh completed"
        );
        Ok(RefreshOutcome::Completed(report))
    }

    /// Most recent dashboard document, from memory or from the data directory.
    pub async fn latest_dashboard(&self) -> Result<DashboardData, AppError> {
        if let Some(data) = self.latest.read().await.as_ref() {
            return Ok(data.clone());
        }

        let path = self.data_dir.join(DASHBOARD_FILE);
        match read_json::<DashboardData>(&path).await? {
            Some(data) => {
                *self.latest.write().await = Some(data.clone());
                Ok(data)
            }
            None => Err(AppError::NotFound(
                "No dashboard data yet; waiting for the first refresh".to_string(),
            )),
        }
    }

    /// Summary of `date` computed from the latest dashboard document.
    pub async fn daily_summary(&self, date: chrono::NaiveDate) -> Result<DailySummary, AppError> {
        let dashboard = self.latest_dashboard().await?;
        Ok(summarize_day(&dashboard, date))
    }

    /// Start the refresh timer, running one refresh immediately.
    pub async fn start(self: &Arc<Self>) {
        self.spawn_scheduler(true).await;
    }

    /// Stop the refresh timer. A refresh already executing is given a few
    /// seconds to finish.
    pub async fn stop(&self) {
        let scheduler = {
            let mut state = self.state.lock().await;
            state.next_refresh = None;
            state.scheduler.take()
        };

        let Some(scheduler) = scheduler else {
            tracing::warn!("Data refresh is not running");
            return;
        };

        let _ = scheduler.shutdown.send(true);
        match tokio::time::timeout(STOP_TIMEOUT, scheduler.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Refresh task failed"),
            Err(_) => tracing::warn!("Refresh task still busy; detaching"),
        }

        tracing::info!("Stopped data refresh");
    }

    /// Change the interval, persisting it. A running timer is restarted on
    /// the new schedule (without an extra immediate refresh).
    pub async fn set_refresh_interval(
        self: &Arc<Self>,
        interval: RefreshInterval,
    ) -> Result<(), AppError> {
        let was_running = {
            let mut state = self.state.lock().await;
            state.refresh_interval = interval;
            self.save_status(&state).await?;
            state.scheduler.is_some()
        };

        if was_running {
            self.stop().await;
            self.spawn_scheduler(false).await;
        }

        tracing::info!(interval = %interval, "Set refresh interval");
        Ok(())
    }

    pub async fn get_status(&self) -> RefreshStatus {
        let in_flight = self.refresh_guard.try_lock().is_err();
        let state = self.state.lock().await;

        RefreshStatus {
            running: state.scheduler.is_some(),
            refresh_interval: state.refresh_interval,
            last_refresh: state.last_refresh.clone(),
            next_refresh: state
                .scheduler
                .as_ref()
                .and(state.next_refresh)
                .map(format_utc_rfc3339),
            in_flight,
        }
    }

    async fn spawn_scheduler(self: &Arc<Self>, initial_refresh: bool) {
        let mut state = self.state.lock().await;
        if state.scheduler.is_some() {
            tracing::warn!("Data refresh is already running");
            return;
        }

        let interval = state.refresh_interval;
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);

        let handle = tokio::spawn(async move {
            tracing::info!(interval = %interval, "Refresh scheduler started");

            if initial_refresh {
                manager.run_scheduled().await;
            }

            loop {
                let now = Utc::now();
                let next = interval.next_run_after(now);
                manager.state.lock().await.next_refresh = Some(next);
                let wait = (next - now).to_std().unwrap_or_default();

                tokio::select! {
                    _ = tokio::time::sleep(wait) => manager.run_scheduled().await,
                    _ = shutdown_rx.changed() => break,
                }
            }

            tracing::info!("Refresh scheduler stopped");
        });

        state.next_refresh = Some(interval.next_run_after(Utc::now()));
        state.scheduler = Some(Scheduler { shutdown, handle });
    }

    /// Timer-driven refresh; failures are logged and retried next tick.
    async fn run_scheduled(&self) {
        match self.refresh_data().await {
            Ok(_) => {}
            Err(e) => tracing::error!(
                error = %e,
                retryable = e.is_retryable(),
                "Scheduled refresh failed"
            ),
        }
    }

    async fn save_status(&self, state: &State) -> Result<(), AppError> {
        let status = PersistedStatus {
            refresh_interval: state.refresh_interval,
            last_refresh: state.last_refresh.clone(),
        };
        write_json_atomic(&self.data_dir.join(STATUS_FILE), &status).await
    }
}
