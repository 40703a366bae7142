// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! CRM API client for pipeline, opportunity and contact data.
//!
//! Handles:
//! - Location / pipeline / stage listing
//! - Opportunity and contact fetching with date filters
//! - The OAuth token endpoint (code exchange and refresh)
//! - Auth failure and rate limit detection

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::config::Config;
use crate::error::AppError;
use crate::models::crm::{
    ContactsResponse, LocationsResponse, OpportunitiesResponse, Pipeline, PipelineStage,
    PipelinesResponse, StagesResponse,
};
use crate::models::{Contact, Location, TokenResponse};
use crate::services::token::{TokenEndpoint, TokenManager};

/// API version header the v2 endpoints require.
const API_VERSION: &str = "2021-07-28";

/// Filters for an opportunity listing.
#[derive(Debug, Clone, Default)]
pub struct OpportunityQuery<'a> {
    pub pipeline_id: Option<&'a str>,
    pub stage_id: Option<&'a str>,
    /// `YYYY-MM-DD`
    pub start_date: Option<&'a str>,
    /// `YYYY-MM-DD`
    pub end_date: Option<&'a str>,
}

/// Low-level CRM HTTP client. Callers supply the access token.
#[derive(Clone)]
pub struct CrmClient {
    http: reqwest::Client,
    base_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl CrmClient {
    /// Create a client with the configured endpoints, credentials and timeout.
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
        })
    }

    /// List all locations (sub-accounts) the token can see.
    pub async fn get_locations(&self, access_token: &str) -> Result<Vec<Location>, AppError> {
        let body: LocationsResponse = self.get_json("/locations/v2", access_token, &[]).await?;

        let total = body.locations.len();
        let locations: Vec<Location> = body
            .locations
            .iter()
            .filter_map(Location::from_value)
            .collect();
        if locations.len() < total {
            tracing::warn!(
                skipped = total - locations.len(),
                "Location records without an id, skipping"
            );
        }
        Ok(locations)
    }

    pub async fn get_pipelines(
        &self,
        access_token: &str,
        location_id: &str,
    ) -> Result<Vec<Pipeline>, AppError> {
        let path = format!("/locations/{}/pipelines/v2", urlencoding::encode(location_id));
        let body: PipelinesResponse = self.get_json(&path, access_token, &[]).await?;
        Ok(body.pipelines)
    }

    pub async fn get_pipeline_stages(
        &self,
        access_token: &str,
        location_id: &str,
        pipeline_id: &str,
    ) -> Result<Vec<PipelineStage>, AppError> {
        let path = format!(
            "/locations/{}/pipelines/{}/stages/v2",
            urlencoding::encode(location_id),
            urlencoding::encode(pipeline_id)
        );
        let body: StagesResponse = self.get_json(&path, access_token, &[]).await?;
        Ok(body.stages)
    }

    /// List opportunities for a location as raw JSON records.
    pub async fn get_opportunities(
        &self,
        access_token: &str,
        location_id: &str,
        query: &OpportunityQuery<'_>,
    ) -> Result<Vec<Value>, AppError> {
        let path = format!(
            "/locations/{}/opportunities/v2",
            urlencoding::encode(location_id)
        );

        let params: Vec<(&str, &str)> = [
            ("pipelineId", query.pipeline_id),
            ("stageId", query.stage_id),
            ("startDate", query.start_date),
            ("endDate", query.end_date),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
        .collect();

        let body: OpportunitiesResponse = self.get_json(&path, access_token, &params).await?;
        Ok(body.opportunities)
    }

    /// List contacts (leads) for a location, optionally within a date range.
    pub async fn get_contacts(
        &self,
        access_token: &str,
        location_id: &str,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<Vec<Contact>, AppError> {
        let path = format!("/locations/{}/contacts/v2", urlencoding::encode(location_id));

        let mut params = Vec::new();
        if let Some(start) = start_date {
            params.push(("startDate", start));
        }
        if let Some(end) = end_date {
            params.push(("endDate", end));
        }

        let body: ContactsResponse = self.get_json(&path, access_token, &params).await?;
        Ok(body.contacts.iter().map(Contact::from_value).collect())
    }

    /// Generic GET request with JSON response.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        access_token: &str,
        params: &[(&str, &str)],
    ) -> Result<T, AppError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .header("Version", API_VERSION)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(params)
            .send()
            .await
            .map_err(|e| AppError::from_transport(&format!("GET {}", path), e))?;

        self.check_response_json(path, response).await
    }

    /// Check response status and parse the JSON body.
    async fn check_response_json<T: DeserializeOwned>(
        &self,
        path: &str,
        response: reqwest::Response,
    ) -> Result<T, AppError> {
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();

            // Unauthorized - token revoked or expired despite the margin
            if status.as_u16() == 401 {
                tracing::warn!(path, "CRM rejected access token (401)");
                return Err(AppError::Authentication(format!(
                    "CRM rejected access token: {}",
                    body
                )));
            }

            if status.as_u16() == 429 {
                tracing::warn!(path, "CRM rate limit hit (429)");
            } else {
                tracing::error!(path, status = status.as_u16(), body = %body, "CRM request failed");
            }

            return Err(AppError::UpstreamRequest {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| AppError::from_transport(&format!("JSON parse error for {}", path), e))
    }

    /// POST a form to the token endpoint.
    async fn post_token_form(
        &self,
        grant: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse, AppError> {
        let response = self
            .http
            .post(&self.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::from_transport(&format!("Token {} request", grant), e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, grant, "Token endpoint rejected request");
            return Err(AppError::Authentication(format!(
                "Token {} failed with status {}",
                grant, status
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Authentication(format!("Failed to parse token response: {}", e)))
    }
}

#[async_trait]
impl TokenEndpoint for CrmClient {
    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, AppError> {
        self.post_token_form(
            "exchange",
            &[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
            ],
        )
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, AppError> {
        self.post_token_form(
            "refresh",
            &[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
        )
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CrmService - API calls behind the token guard
// ─────────────────────────────────────────────────────────────────────────────

/// High-level CRM service: every call first obtains a valid token from the
/// `TokenManager`, refreshing it if needed, then issues the request.
#[derive(Clone)]
pub struct CrmService {
    client: CrmClient,
    tokens: Arc<TokenManager>,
}

impl CrmService {
    pub fn new(client: CrmClient, tokens: Arc<TokenManager>) -> Self {
        Self { client, tokens }
    }

    async fn access_token(&self) -> Result<String, AppError> {
        Ok(self.tokens.get_valid_token().await?.access_token)
    }

    pub async fn get_locations(&self) -> Result<Vec<Location>, AppError> {
        let token = self.access_token().await?;
        self.client.get_locations(&token).await
    }

    pub async fn get_pipelines(&self, location_id: &str) -> Result<Vec<Pipeline>, AppError> {
        let token = self.access_token().await?;
        self.client.get_pipelines(&token, location_id).await
    }

    pub async fn get_pipeline_stages(
        &self,
        location_id: &str,
        pipeline_id: &str,
    ) -> Result<Vec<PipelineStage>, AppError> {
        let token = self.access_token().await?;
        self.client
            .get_pipeline_stages(&token, location_id, pipeline_id)
            .await
    }

    pub async fn get_opportunities(
        &self,
        location_id: &str,
        query: &OpportunityQuery<'_>,
    ) -> Result<Vec<Value>, AppError> {
        let token = self.access_token().await?;
        self.client
            .get_opportunities(&token, location_id, query)
            .await
    }

    pub async fn get_contacts(
        &self,
        location_id: &str,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<Vec<Contact>, AppError> {
        let token = self.access_token().await?;
        self.client
            .get_contacts(&token, location_id, start_date, end_date)
            .await
    }
}
