// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Dashboard output documents.
//!
//! These are written to the data directory on every refresh and served
//! as-is by the API, so the presentation layer never talks to the CRM.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Period key → summed monetary value.
pub type Buckets = BTreeMap<String, f64>;

/// Retail and rental buckets for one location at one resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelBuckets {
    #[serde(default)]
    pub retail: Buckets,
    #[serde(default)]
    pub rental: Buckets,
}

/// Lead response statistics for one location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadMetrics {
    pub total_leads: u32,
    pub responded_leads: u32,
    /// `responded_leads / total_leads`, 0 when there are no leads
    pub response_rate: f64,
    /// Mean minutes from lead creation to last contact, 0 when unknown
    pub avg_response_time_minutes: f64,
}

/// Full dashboard document (`dashboard_data.json`).
///
/// Maps are keyed by location name; `locations` carries the display order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardData {
    pub locations: Vec<String>,

    // ─── Sales ───────────────────────────────────────────────────
    /// Keys are `YYYY-MM-DD`
    #[serde(default)]
    pub daily_totals: BTreeMap<String, ChannelBuckets>,
    /// Keys are ISO-8601 weeks, `YYYY-Www`
    #[serde(default)]
    pub weekly_totals: BTreeMap<String, ChannelBuckets>,
    /// Keys are `YYYY-MM`
    #[serde(default)]
    pub monthly_totals: BTreeMap<String, ChannelBuckets>,

    // ─── Leads ───────────────────────────────────────────────────
    #[serde(default)]
    pub lead_metrics: BTreeMap<String, LeadMetrics>,

    /// Refresh timestamp (RFC3339)
    #[serde(default)]
    pub last_updated: String,
}

impl DashboardData {
    /// Restrict the document to the given locations, keeping display order.
    ///
    /// Unknown names are ignored.
    pub fn retain_locations(&mut self, names: &[String]) {
        self.locations.retain(|l| names.contains(l));
        let keep = self.locations.clone();
        for map in [
            &mut self.daily_totals,
            &mut self.weekly_totals,
            &mut self.monthly_totals,
        ] {
            map.retain(|name, _| keep.contains(name));
        }
        self.lead_metrics.retain(|name, _| keep.contains(name));
    }
}

/// Sales for one location on one day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationPerformance {
    pub retail_sales: f64,
    pub rental_sales: f64,
    pub total_sales: f64,
}

/// Per-day summary across locations (`daily_summary_YYYY-MM-DD.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    /// The summarized day, `YYYY-MM-DD`
    pub date: String,
    pub total_retail_sales: f64,
    pub total_rental_sales: f64,
    pub location_performance: BTreeMap<String, LocationPerformance>,
    /// Location with the highest retail total (first in order on ties)
    pub top_retail_location: Option<String>,
    /// Location with the highest rental total (first in order on ties)
    pub top_rental_location: Option<String>,
    pub lead_response: BTreeMap<String, LeadMetrics>,
}
