// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! CRM API records: locations, pipelines, stages and contacts.
//!
//! Opportunities and locations arrive as raw JSON and are read field by
//! field, so one malformed record never fails a page.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A CRM location (sub-account).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub name: String,
}

impl Location {
    /// Extract a location from a raw CRM record. Records without an id are
    /// unusable and give `None`; a missing name falls back to the id.
    pub fn from_value(value: &Value) -> Option<Self> {
        let field = |name: &str| {
            value
                .get(name)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };

        let id = field("id")?;
        let name = field("name").unwrap_or_else(|| id.clone());
        Some(Self { id, name })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStage {
    pub id: String,
    pub name: String,
}

/// A lead, reduced to what the response metrics need.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: Option<String>,
    pub location_id: Option<String>,
    pub created_at: Option<String>,
    pub last_contacted_date: Option<String>,
}

impl Contact {
    /// Extract a contact from a raw CRM record.
    ///
    /// Fields that are missing or not strings become `None`.
    pub fn from_value(value: &Value) -> Self {
        let field = |name: &str| {
            value
                .get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };

        Self {
            id: field("id"),
            location_id: field("locationId"),
            created_at: field("createdAt"),
            last_contacted_date: field("lastContactedDate"),
        }
    }
}

// ─── Response envelopes ─────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LocationsResponse {
    #[serde(default)]
    pub locations: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct PipelinesResponse {
    #[serde(default)]
    pub pipelines: Vec<Pipeline>,
}

#[derive(Debug, Deserialize)]
pub struct StagesResponse {
    #[serde(default)]
    pub stages: Vec<PipelineStage>,
}

#[derive(Debug, Deserialize)]
pub struct OpportunitiesResponse {
    #[serde(default)]
    pub opportunities: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ContactsResponse {
    #[serde(default)]
    pub contacts: Vec<Value>,
}

// ─── Collected data ─────────────────────────────────────────

/// Everything collected for one location in a refresh cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationPipelineData {
    pub name: String,
    pub location_id: String,
    /// Raw opportunities in the retail stage
    pub sold_retail: Vec<Value>,
    /// Raw opportunities in the rental stage
    pub sold_rental: Vec<Value>,
    pub contacts: Vec<Contact>,
}

/// One refresh cycle's raw data, in dashboard location order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineData {
    pub start_date: String,
    pub end_date: String,
    pub locations: Vec<LocationPipelineData>,
}
