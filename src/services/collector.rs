// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Collection of one refresh cycle's raw pipeline data.
//!
//! For each tracked location: every pipeline, the configured retail and
//! rental stages, the opportunities sitting in those stages within the
//! lookback window, and the contacts created in the same window.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

use crate::config::{Config, MAX_LOOKBACK_DAYS};
use crate::error::AppError;
use crate::models::{Location, LocationPipelineData, PipelineData};
use crate::services::crm::{CrmService, OpportunityQuery};

/// Lookback window as `YYYY-MM-DD` strings.
struct CollectionWindow {
    start: String,
    end: String,
}

/// Anything that can produce a cycle's `PipelineData`.
#[async_trait]
pub trait PipelineSource: Send + Sync {
    async fn collect(&self, now: DateTime<Utc>) -> Result<PipelineData, AppError>;
}

pub struct PipelineCollector {
    crm: CrmService,
    tracked_locations: Vec<String>,
    retail_stage: String,
    rental_stage: String,
    lookback_days: i64,
}

impl PipelineCollector {
    pub fn new(crm: CrmService, config: &Config) -> Self {
        Self {
            crm,
            tracked_locations: config.tracked_locations.clone(),
            retail_stage: config.retail_stage.clone(),
            rental_stage: config.rental_stage.clone(),
            lookback_days: config.lookback_days.clamp(0, MAX_LOOKBACK_DAYS),
        }
    }

    async fn collect_location(
        &self,
        location: &Location,
        dates: &CollectionWindow,
    ) -> Result<LocationPipelineData, AppError> {
        tracing::info!(location = %location.name, "Collecting pipeline data");

        let mut data = LocationPipelineData {
            name: location.name.clone(),
            location_id: location.id.clone(),
            ..Default::default()
        };

        let pipelines = soft(self.crm.get_pipelines(&location.id).await, "pipelines")?;

        for pipeline in &pipelines {
            let stages = soft(
                self.crm
                    .get_pipeline_stages(&location.id, &pipeline.id)
                    .await,
                "stages",
            )?;

            for stage in &stages {
                let is_retail = stage.name == self.retail_stage;
                let is_rental = stage.name == self.rental_stage;
                if !is_retail && !is_rental {
                    continue;
                }

                let query = OpportunityQuery {
                    pipeline_id: Some(pipeline.id.as_str()),
                    stage_id: Some(stage.id.as_str()),
                    start_date: Some(dates.start.as_str()),
                    end_date: Some(dates.end.as_str()),
                };
                let opportunities = soft(
                    self.crm.get_opportunities(&location.id, &query).await,
                    "opportunities",
                )?;

                tracing::debug!(
                    location = %location.name,
                    pipeline = %pipeline.name,
                    stage = %stage.name,
                    count = opportunities.len(),
                    "Fetched opportunities"
                );

                if is_retail {
                    data.sold_retail.extend(opportunities);
                } else {
                    data.sold_rental.extend(opportunities);
                }
            }
        }

        data.contacts = soft(
            self.crm
                .get_contacts(
                    &location.id,
                    Some(dates.start.as_str()),
                    Some(dates.end.as_str()),
                )
                .await,
            "contacts",
        )?;

        Ok(data)
    }
}

#[async_trait]
impl PipelineSource for PipelineCollector {
    async fn collect(&self, now: DateTime<Utc>) -> Result<PipelineData, AppError> {
        let dates = CollectionWindow {
            start: (now - Duration::days(self.lookback_days))
                .format("%Y-%m-%d")
                .to_string(),
            end: now.format("%Y-%m-%d").to_string(),
        };

        let all_locations = self.crm.get_locations().await?;
        let locations = select_locations(all_locations, &self.tracked_locations);

        let mut collected = Vec::with_capacity(locations.len());
        for location in &locations {
            collected.push(self.collect_location(location, &dates).await?);
        }

        tracing::info!(
            locations = collected.len(),
            start_date = %dates.start,
            end_date = %dates.end,
            "Pipeline data collected"
        );

        Ok(PipelineData {
            start_date: dates.start,
            end_date: dates.end,
            locations: collected,
        })
    }
}

/// Pick the tracked locations, in tracked order. Empty `tracked` keeps all
/// locations in CRM order. A location is selected at most once.
pub fn select_locations(all: Vec<Location>, tracked: &[String]) -> Vec<Location> {
    if tracked.is_empty() {
        return all;
    }

    let mut seen = HashSet::new();
    tracked
        .iter()
        .filter(|name| {
            let first = seen.insert(name.as_str());
            if !first {
                tracing::warn!(location = %name, "Location tracked twice, ignoring repeat");
            }
            first
        })
        .filter_map(|name| {
            let found = all.iter().find(|loc| &loc.name == name).cloned();
            if found.is_none() {
                tracing::warn!(location = %name, "Tracked location not visible to this token");
            }
            found
        })
        .collect()
}

/// A failed page from the CRM (non-2xx or undecodable body) counts as an
/// empty page. Authentication and timeout errors still abort the cycle.
fn soft<T: Default>(result: Result<T, AppError>, what: &str) -> Result<T, AppError> {
    match result {
        Ok(value) => Ok(value),
        Err(e @ (AppError::UpstreamRequest { .. } | AppError::Upstream(_))) => {
            tracing::warn!(error = %e, what, "CRM page failed, treating as empty");
            Ok(T::default())
        }
        Err(e) => Err(e),
    }
}
