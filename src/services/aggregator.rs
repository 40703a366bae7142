// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Pipeline aggregation: raw CRM records → bucketed dashboard totals.
//!
//! Everything here is a pure function of its input. Malformed records are
//! coerced to safe defaults and logged; aggregation never fails.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use crate::models::dashboard::{Buckets, LocationPerformance};
use crate::models::{
    ChannelBuckets, Contact, DailySummary, DashboardData, LeadMetrics, LocationPipelineData,
    PipelineData,
};
use crate::time_utils::{format_utc_rfc3339, parse_calendar_date, parse_timestamp};

/// Which record fields feed a daily bucketing.
#[derive(Debug, Clone, Copy)]
pub struct BucketFields<'a> {
    /// Numeric field to sum
    pub value: &'a str,
    /// Date field deciding the bucket
    pub date: &'a str,
    /// Used when `date` is absent or unparseable
    pub fallback_date: &'a str,
}

/// Opportunities are bucketed by closing date, falling back to creation date.
pub const OPPORTUNITY_FIELDS: BucketFields<'static> = BucketFields {
    value: "monetaryValue",
    date: "closedDate",
    fallback_date: "createdAt",
};

/// Time resolution of a bucket map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// `YYYY-MM-DD`
    Daily,
    /// ISO-8601 week (Monday start, ISO week-year), `YYYY-Www`
    Weekly,
    /// `YYYY-MM`
    Monthly,
}

impl Resolution {
    /// The bucket key covering `date` at this resolution.
    pub fn period_key(self, date: NaiveDate) -> String {
        match self {
            Resolution::Daily => date.format("%Y-%m-%d").to_string(),
            Resolution::Weekly => {
                let week = date.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Resolution::Monthly => date.format("%Y-%m").to_string(),
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Resolution::Daily => "daily",
            Resolution::Weekly => "weekly",
            Resolution::Monthly => "monthly",
        })
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "day" => Ok(Resolution::Daily),
            "weekly" | "week" => Ok(Resolution::Weekly),
            "monthly" | "month" => Ok(Resolution::Monthly),
            other => Err(format!("unknown resolution '{}'", other)),
        }
    }
}

// ─── Bucketing ──────────────────────────────────────────────

/// Sum `fields.value` per calendar day.
///
/// Records whose date cannot be determined are skipped with a warning.
pub fn bucket_by_day(records: &[Value], fields: &BucketFields<'_>) -> Buckets {
    let mut buckets = Buckets::new();

    for record in records {
        let Some(date) = record_date(record, fields) else {
            tracing::warn!(
                id = %record_id(record),
                date_field = fields.date,
                fallback_field = fields.fallback_date,
                "Record has no usable date, skipping"
            );
            continue;
        };

        let value = coerce_value(record, fields.value);
        *buckets
            .entry(Resolution::Daily.period_key(date))
            .or_insert(0.0) += value;
    }

    buckets
}

/// Derive coarser buckets from daily ones.
///
/// Every valid daily key lands in exactly one output bucket, so the totals
/// re-sum to the daily total.
pub fn roll_up(daily: &Buckets, resolution: Resolution) -> Buckets {
    let mut rolled = Buckets::new();

    for (day, value) in daily {
        let Some(date) = NaiveDate::parse_from_str(day, "%Y-%m-%d").ok() else {
            tracing::warn!(key = %day, "Daily bucket key is not a date, skipping");
            continue;
        };
        *rolled.entry(resolution.period_key(date)).or_insert(0.0) += value;
    }

    rolled
}

fn record_date(record: &Value, fields: &BucketFields<'_>) -> Option<NaiveDate> {
    [fields.date, fields.fallback_date]
        .into_iter()
        .filter_map(|name| {
            let raw = record.get(name)?.as_str()?;
            if raw.is_empty() {
                return None;
            }
            let parsed = parse_calendar_date(raw);
            if parsed.is_none() {
                tracing::warn!(id = %record_id(record), field = name, value = raw, "Unparseable date");
            }
            parsed
        })
        .next()
}

/// Numeric value of `field`: JSON numbers and numeric strings count,
/// everything else is 0.
fn coerce_value(record: &Value, field: &str) -> f64 {
    let value = match record.get(field) {
        None | Some(Value::Null) => {
            tracing::debug!(id = %record_id(record), field, "Missing value, counting as 0");
            return 0.0;
        }
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };

    match value {
        Some(v) if v.is_finite() => v,
        _ => {
            let raw = record.get(field).unwrap_or(&serde_json::Value::Null);
            tracing::warn!(
                id = %record_id(record),
                field,
                raw = %raw,
                "Non-numeric value, counting as 0"
            );
            0.0
        }
    }
}

fn record_id(record: &Value) -> String {
    record
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or("<unknown>")
        .to_string()
}

// ─── Lead response ──────────────────────────────────────────

/// Response rate and mean response latency over a set of leads.
pub fn compute_response_metrics(contacts: &[Contact]) -> LeadMetrics {
    let total = contacts.len() as u32;
    let responded = contacts
        .iter()
        .filter(|c| c.last_contacted_date.is_some())
        .count() as u32;

    let latencies: Vec<f64> = contacts.iter().filter_map(response_minutes).collect();

    let avg = if latencies.is_empty() {
        0.0
    } else {
        latencies.iter().sum::<f64>() / latencies.len() as f64
    };

    LeadMetrics {
        total_leads: total,
        responded_leads: responded,
        response_rate: if total > 0 {
            responded as f64 / total as f64
        } else {
            0.0
        },
        avg_response_time_minutes: avg,
    }
}

fn response_minutes(contact: &Contact) -> Option<f64> {
    let created_raw = contact.created_at.as_deref()?;
    let contacted_raw = contact.last_contacted_date.as_deref()?;

    let (Some(created), Some(contacted)) =
        (parse_timestamp(created_raw), parse_timestamp(contacted_raw))
    else {
        tracing::warn!(
            id = contact.id.as_deref().unwrap_or("<unknown>"),
            created_at = created_raw,
            last_contacted = contacted_raw,
            "Unparseable contact timestamps, excluded from response time"
        );
        return None;
    };

    let minutes = (contacted - created).num_seconds() as f64 / 60.0;
    if minutes < 0.0 {
        tracing::warn!(
            id = contact.id.as_deref().unwrap_or("<unknown>"),
            "Contact reached before creation, excluded from response time"
        );
        return None;
    }
    Some(minutes)
}

// ─── Dashboard documents ────────────────────────────────────

/// Fold one refresh cycle's raw data into the dashboard document.
pub fn build_dashboard_data(raw: &PipelineData, now: DateTime<Utc>) -> DashboardData {
    let mut data = DashboardData {
        last_updated: format_utc_rfc3339(now),
        ..Default::default()
    };

    let mut taken = HashSet::new();

    for location in &raw.locations {
        let key = unique_location_key(location, &taken);
        taken.insert(key.clone());

        let daily = ChannelBuckets {
            retail: bucket_by_day(&location.sold_retail, &OPPORTUNITY_FIELDS),
            rental: bucket_by_day(&location.sold_rental, &OPPORTUNITY_FIELDS),
        };
        let weekly = ChannelBuckets {
            retail: roll_up(&daily.retail, Resolution::Weekly),
            rental: roll_up(&daily.rental, Resolution::Weekly),
        };
        let monthly = ChannelBuckets {
            retail: roll_up(&daily.retail, Resolution::Monthly),
            rental: roll_up(&daily.rental, Resolution::Monthly),
        };

        tracing::debug!(
            location = %key,
            retail_days = daily.retail.len(),
            rental_days = daily.rental.len(),
            "Aggregated location"
        );

        data.daily_totals.insert(key.clone(), daily);
        data.weekly_totals.insert(key.clone(), weekly);
        data.monthly_totals.insert(key.clone(), monthly);
        data.lead_metrics
            .insert(key.clone(), compute_response_metrics(&location.contacts));
        data.locations.push(key);
    }

    data
}

/// Dashboard key for a location: its name, or `name (location_id)` when the
/// name is already taken, then a numeric suffix as a last resort.
fn unique_location_key(location: &LocationPipelineData, taken: &HashSet<String>) -> String {
    if !taken.contains(&location.name) {
        return location.name.clone();
    }

    let mut key = format!("{} ({})", location.name, location.location_id);
    let mut n = 2;
    while taken.contains(&key) {
        key = format!("{} ({}) #{}", location.name, location.location_id, n);
        n += 1;
    }

    tracing::warn!(
        location = %location.name,
        location_id = %location.location_id,
        key = %key,
        "Duplicate location name, keyed by id"
    );
    key
}

/// Per-location sales for a single day, with the top retail and rental
/// locations. Ties go to the location listed first in `data.locations`.
pub fn summarize_day(data: &DashboardData, target_date: NaiveDate) -> DailySummary {
    let key = Resolution::Daily.period_key(target_date);
    let mut summary = DailySummary {
        date: key.clone(),
        ..Default::default()
    };

    let mut top_retail: Option<(&str, f64)> = None;
    let mut top_rental: Option<(&str, f64)> = None;
    let mut seen = HashSet::new();

    for location in &data.locations {
        if !seen.insert(location.as_str()) {
            continue;
        }
        let day_value = |buckets: Option<&Buckets>| {
            buckets.and_then(|b| b.get(&key)).copied().unwrap_or(0.0)
        };
        let totals = data.daily_totals.get(location);
        let retail = day_value(totals.map(|t| &t.retail));
        let rental = day_value(totals.map(|t| &t.rental));

        summary.total_retail_sales += retail;
        summary.total_rental_sales += rental;
        summary.location_performance.insert(
            location.clone(),
            LocationPerformance {
                retail_sales: retail,
                rental_sales: rental,
                total_sales: retail + rental,
            },
        );
        summary.lead_response.insert(
            location.clone(),
            data.lead_metrics.get(location).cloned().unwrap_or_default(),
        );

        // Strictly greater: the earlier location keeps a tie
        if top_retail.map_or(true, |(_, best)| retail > best) {
            top_retail = Some((location.as_str(), retail));
        }
        if top_rental.map_or(true, |(_, best)| rental > best) {
            top_rental = Some((location.as_str(), rental));
        }
    }

    summary.top_retail_location = top_retail.map(|(name, _)| name.to_string());
    summary.top_rental_location = top_rental.map(|(name, _)| name.to_string());
    summary
}

/// Select the totals map for a resolution.
pub fn totals_for(
    data: &DashboardData,
    resolution: Resolution,
) -> &BTreeMap<String, ChannelBuckets> {
    match resolution {
        Resolution::Daily => &data.daily_totals,
        Resolution::Weekly => &data.weekly_totals,
        Resolution::Monthly => &data.monthly_totals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_records() -> Vec<Value> {
        vec![
            json!({"closedDate": "2025-01-01", "monetaryValue": 100}),
            json!({"closedDate": "2025-01-01", "monetaryValue": 50}),
            json!({"closedDate": "2025-01-02", "monetaryValue": 200}),
        ]
    }

    fn contact(created: Option<&str>, contacted: Option<&str>) -> Contact {
        Contact {
            created_at: created.map(String::from),
            last_contacted_date: contacted.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_bucket_by_day_and_monthly_rollup() {
        let daily = bucket_by_day(&sample_records(), &OPPORTUNITY_FIELDS);

        assert_eq!(daily.len(), 2);
        assert_eq!(daily.get("2025-01-01"), Some(&150.0));
        assert_eq!(daily.get("2025-01-02"), Some(&200.0));

        let monthly = roll_up(&daily, Resolution::Monthly);
        assert_eq!(monthly.len(), 1);
        assert_eq!(monthly.get("2025-01"), Some(&350.0));
    }

    #[test]
    fn test_bucket_by_day_is_idempotent() {
        let records = sample_records();
        assert_eq!(
            bucket_by_day(&records, &OPPORTUNITY_FIELDS),
            bucket_by_day(&records, &OPPORTUNITY_FIELDS)
        );
    }

    #[test]
    fn test_empty_inputs_give_empty_maps() {
        assert!(bucket_by_day(&[], &OPPORTUNITY_FIELDS).is_empty());
        assert!(roll_up(&Buckets::new(), Resolution::Weekly).is_empty());
        assert!(roll_up(&Buckets::new(), Resolution::Monthly).is_empty());
    }

    #[test]
    fn test_falls_back_to_created_at() {
        let records = vec![
            json!({"createdAt": "2025-03-04T15:00:00Z", "monetaryValue": 10}),
            json!({"closedDate": null, "createdAt": "2025-03-04", "monetaryValue": 5}),
            json!({"closedDate": "garbage", "createdAt": "2025-03-05", "monetaryValue": 1}),
        ];

        let daily = bucket_by_day(&records, &OPPORTUNITY_FIELDS);

        assert_eq!(daily.get("2025-03-04"), Some(&15.0));
        assert_eq!(daily.get("2025-03-05"), Some(&1.0));
    }

    #[test]
    fn test_malformed_values_count_as_zero() {
        let records = vec![
            json!({"id": "a", "closedDate": "2025-01-01", "monetaryValue": "12.5"}),
            json!({"id": "b", "closedDate": "2025-01-01", "monetaryValue": "n/a"}),
            json!({"id": "c", "closedDate": "2025-01-01"}),
            json!({"id": "d", "closedDate": "2025-01-01", "monetaryValue": {"amount": 3}}),
            json!({"id": "e", "monetaryValue": 99}),
        ];

        let daily = bucket_by_day(&records, &OPPORTUNITY_FIELDS);

        // "e" has no date at all and is skipped; the rest land on one day.
        assert_eq!(daily.len(), 1);
        assert_eq!(daily.get("2025-01-01"), Some(&12.5));
    }

    #[test]
    fn test_iso_week_keys() {
        let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();

        // 2024-12-30 is the Monday of ISO week 1 of 2025.
        assert_eq!(Resolution::Weekly.period_key(date(2024, 12, 30)), "2025-W01");
        assert_eq!(Resolution::Weekly.period_key(date(2025, 1, 5)), "2025-W01");
        assert_eq!(Resolution::Weekly.period_key(date(2025, 1, 6)), "2025-W02");
        // 2021-01-03 belongs to the last ISO week of 2020.
        assert_eq!(Resolution::Weekly.period_key(date(2021, 1, 3)), "2020-W53");
    }

    #[test]
    fn test_weekly_rollup_sums_across_month_boundary() {
        let mut daily = Buckets::new();
        daily.insert("2025-01-31".to_string(), 10.0);
        daily.insert("2025-02-01".to_string(), 20.0);
        daily.insert("2025-02-03".to_string(), 5.0);

        let weekly = roll_up(&daily, Resolution::Weekly);

        assert_eq!(weekly.get("2025-W05"), Some(&30.0));
        assert_eq!(weekly.get("2025-W06"), Some(&5.0));
        assert_eq!(weekly.values().sum::<f64>(), daily.values().sum::<f64>());
    }

    #[test]
    fn test_response_metrics_scenario() {
        let contacts = vec![
            contact(Some("2025-01-01T00:00:00Z"), Some("2025-01-01T00:10:00Z")),
            contact(Some("2025-01-01T00:00:00Z"), None),
        ];

        let metrics = compute_response_metrics(&contacts);

        assert_eq!(metrics.total_leads, 2);
        assert_eq!(metrics.responded_leads, 1);
        assert_eq!(metrics.response_rate, 0.5);
        assert_eq!(metrics.avg_response_time_minutes, 10.0);
    }

    #[test]
    fn test_response_metrics_empty_and_malformed() {
        assert_eq!(compute_response_metrics(&[]), LeadMetrics::default());

        let contacts = vec![
            contact(Some("yesterday"), Some("2025-01-01T00:10:00Z")),
            contact(Some("2025-01-01T01:00:00Z"), Some("2025-01-01T00:00:00Z")),
            contact(None, Some("2025-01-01T00:00:00Z")),
        ];
        let metrics = compute_response_metrics(&contacts);

        assert_eq!(metrics.responded_leads, 3);
        assert_eq!(metrics.response_rate, 1.0);
        assert_eq!(metrics.avg_response_time_minutes, 0.0);
    }

    fn sample_dashboard() -> DashboardData {
        let raw = PipelineData {
            locations: vec![
                LocationPipelineData {
                    name: "Augusta".to_string(),
                    sold_retail: vec![json!({"closedDate": "2025-01-02", "monetaryValue": 300})],
                    sold_rental: vec![json!({"closedDate": "2025-01-02", "monetaryValue": 40})],
                    ..Default::default()
                },
                LocationPipelineData {
                    name: "Macon".to_string(),
                    sold_retail: vec![json!({"closedDate": "2025-01-02", "monetaryValue": 300})],
                    sold_rental: vec![json!({"closedDate": "2025-01-02", "monetaryValue": 75})],
                    contacts: vec![contact(
                        Some("2025-01-01T00:00:00Z"),
                        Some("2025-01-01T00:30:00Z"),
                    )],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        build_dashboard_data(&raw, Utc::now())
    }

    #[test]
    fn test_build_dashboard_data_shapes() {
        let data = sample_dashboard();

        assert_eq!(data.locations, vec!["Augusta", "Macon"]);
        assert_eq!(data.daily_totals["Macon"].rental.get("2025-01-02"), Some(&75.0));
        assert_eq!(data.weekly_totals["Macon"].retail.get("2025-W01"), Some(&300.0));
        assert_eq!(data.monthly_totals["Augusta"].rental.get("2025-01"), Some(&40.0));
        assert_eq!(data.lead_metrics["Macon"].avg_response_time_minutes, 30.0);
        assert_eq!(data.lead_metrics["Augusta"], LeadMetrics::default());
    }

    #[test]
    fn test_summarize_day_ties_go_to_first_location() {
        let data = sample_dashboard();
        let summary = summarize_day(&data, NaiveDate::from_ymd_opt(2025, 1, 2).unwrap());

        assert_eq!(summary.date, "2025-01-02");
        assert_eq!(summary.total_retail_sales, 600.0);
        assert_eq!(summary.total_rental_sales, 115.0);
        assert_eq!(summary.top_retail_location.as_deref(), Some("Augusta"));
        assert_eq!(summary.top_rental_location.as_deref(), Some("Macon"));
        assert_eq!(summary.location_performance["Macon"].total_sales, 375.0);
        assert_eq!(summary.lead_response["Macon"].total_leads, 1);
    }

    #[test]
    fn test_summarize_day_without_sales() {
        let data = sample_dashboard();
        let summary = summarize_day(&data, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());

        assert_eq!(summary.total_retail_sales, 0.0);
        assert_eq!(summary.location_performance.len(), 2);
        assert_eq!(summary.top_retail_location.as_deref(), Some("Augusta"));

        let empty = summarize_day(&DashboardData::default(), NaiveDate::MIN);
        assert!(empty.top_retail_location.is_none());
        assert!(empty.location_performance.is_empty());
    }

    #[test]
    fn test_same_named_locations_keep_all_records() {
        let raw = PipelineData {
            locations: vec![
                LocationPipelineData {
                    name: "Augusta".to_string(),
                    location_id: "loc_a1".to_string(),
                    sold_retail: vec![json!({"closedDate": "2025-01-02", "monetaryValue": 100})],
                    ..Default::default()
                },
                LocationPipelineData {
                    name: "Augusta".to_string(),
                    location_id: "loc_a2".to_string(),
                    sold_retail: vec![json!({"closedDate": "2025-01-02", "monetaryValue": 7})],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let data = build_dashboard_data(&raw, Utc::now());
        assert_eq!(data.locations, vec!["Augusta", "Augusta (loc_a2)"]);
        assert_eq!(data.daily_totals["Augusta"].retail["2025-01-02"], 100.0);
        assert_eq!(data.daily_totals["Augusta (loc_a2)"].retail["2025-01-02"], 7.0);

        let summary = summarize_day(&data, NaiveDate::from_ymd_opt(2025, 1, 2).unwrap());
        assert_eq!(summary.total_retail_sales, 107.0);
        assert_eq!(summary.location_performance.len(), 2);
        assert_eq!(summary.top_retail_location.as_deref(), Some("Augusta"));
    }

    #[test]
    fn test_summarize_day_counts_repeated_key_once() {
        let mut data = sample_dashboard();
        data.locations.push("Macon".to_string());

        let summary = summarize_day(&data, NaiveDate::from_ymd_opt(2025, 1, 2).unwrap());
        assert_eq!(summary.total_retail_sales, 600.0);
        assert_eq!(summary.total_rental_sales, 115.0);
    }

    #[test]
    fn test_resolution_parse() {
        assert_eq!("Weekly".parse::<Resolution>(), Ok(Resolution::Weekly));
        assert_eq!("month".parse::<Resolution>(), Ok(Resolution::Monthly));
        assert!("yearly".parse::<Resolution>().is_err());
    }
}
