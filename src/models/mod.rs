// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod crm;
pub mod dashboard;
pub mod token;

pub use crm::{Contact, Location, LocationPipelineData, PipelineData};
pub use dashboard::{ChannelBuckets, DailySummary, DashboardData, LeadMetrics};
pub use token::{Token, TokenResponse};
