// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod aggregator;
pub mod collector;
pub mod crm;
pub mod refresh;
pub mod token;

pub use collector::{PipelineCollector, PipelineSource};
pub use crm::{CrmClient, CrmService};
pub use refresh::{RefreshInterval, RefreshManager};
pub use token::{TokenEndpoint, TokenManager};
