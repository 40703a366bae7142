// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Pipeline collection against a mocked CRM.

mod common;

use chrono::{TimeZone, Utc};
use common::{token_expiring_in, FakeTokenEndpoint};
use pipeline_dashboard::config::Config;
use pipeline_dashboard::db::{SqliteTokenStore, TokenStore};
use pipeline_dashboard::error::AppError;
use pipeline_dashboard::services::{
    CrmClient, CrmService, PipelineCollector, PipelineSource, TokenManager,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{bearer_token, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn collector_for(server: &MockServer, tracked: &[&str]) -> PipelineCollector {
    let config = Config {
        api_base_url: server.uri(),
        token_url: format!("{}/oauth/token", server.uri()),
        http_timeout: Duration::from_secs(2),
        tracked_locations: tracked.iter().map(|s| s.to_string()).collect(),
        lookback_days: 30,
        ..Config::default()
    };

    let store = Arc::new(SqliteTokenStore::in_memory().await.unwrap());
    store.save(&token_expiring_in(3600)).await.unwrap();

    let tokens = TokenManager::load(&config, Arc::new(FakeTokenEndpoint::ok()), store)
        .await
        .unwrap();
    let crm = CrmService::new(CrmClient::new(&config).unwrap(), Arc::new(tokens));
    PipelineCollector::new(crm, &config)
}

async fn mount_locations(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/locations/v2"))
        .and(bearer_token("old_access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "locations": [
                {"id": "loc_a", "name": "Augusta"},
                {"name": "No Id"},
                {"id": "loc_m", "name": "Macon"}
            ]
        })))
        .mount(server)
        .await;
}

/// Macon: one pipeline with retail, rental and an untracked stage.
async fn mount_macon(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/locations/loc_m/pipelines/v2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "pipelines": [{"id": "p1", "name": "Sales"}]
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/locations/loc_m/pipelines/p1/stages/v2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stages": [
                {"id": "s_retail", "name": "Sold Retail"},
                {"id": "s_rental", "name": "Sold Rental"},
                {"id": "s_new", "name": "New Lead"}
            ]
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/locations/loc_m/opportunities/v2"))
        .and(query_param("pipelineId", "p1"))
        .and(query_param("stageId", "s_retail"))
        .and(query_param("startDate", "2024-12-03"))
        .and(query_param("endDate", "2025-01-02"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "opportunities": [{"id": "o1", "monetaryValue": 250, "closedDate": "2025-01-01"}]
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/locations/loc_m/opportunities/v2"))
        .and(query_param("stageId", "s_rental"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/locations/loc_m/opportunities/v2"))
        .and(query_param("stageId", "s_new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"opportunities": []})))
        .expect(0)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/locations/loc_m/contacts/v2"))
        .and(query_param("startDate", "2024-12-03"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "contacts": [{"id": "c1", "createdAt": "2025-01-01T10:00:00Z"}]
        })))
        .mount(server)
        .await;
}

fn now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 2, 12, 0, 0).unwrap()
}

#[tokio::test]
async fn test_failed_location_page_keeps_other_locations() {
    let server = MockServer::start().await;
    mount_locations(&server).await;
    mount_macon(&server).await;

    Mock::given(method("GET"))
        .and(path("/locations/loc_a/pipelines/v2"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/locations/loc_a/contacts/v2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "contacts": [{"id": "c9"}, {"id": "c10"}]
        })))
        .mount(&server)
        .await;

    let data = collector_for(&server, &[]).await.collect(now()).await.unwrap();

    assert_eq!(data.start_date, "2024-12-03");
    assert_eq!(data.end_date, "2025-01-02");

    let names: Vec<_> = data.locations.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, vec!["Augusta", "Macon"]);

    let augusta = &data.locations[0];
    assert!(augusta.sold_retail.is_empty());
    assert!(augusta.sold_rental.is_empty());
    assert_eq!(augusta.contacts.len(), 2);

    let macon = &data.locations[1];
    assert_eq!(macon.location_id, "loc_m");
    assert_eq!(macon.sold_retail.len(), 1);
    assert_eq!(macon.sold_retail[0]["monetaryValue"], 250);
    assert!(macon.sold_rental.is_empty());
    assert_eq!(macon.contacts.len(), 1);
}

#[tokio::test]
async fn test_tracked_locations_only() {
    let server = MockServer::start().await;
    mount_locations(&server).await;
    mount_macon(&server).await;

    Mock::given(method("GET"))
        .and(path("/locations/loc_a/pipelines/v2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"pipelines": []})))
        .expect(0)
        .mount(&server)
        .await;

    let data = collector_for(&server, &["Macon", "Macon"])
        .await
        .collect(now())
        .await
        .unwrap();

    assert_eq!(data.locations.len(), 1);
    assert_eq!(data.locations[0].name, "Macon");
}

#[tokio::test]
async fn test_unauthorized_page_aborts_cycle() {
    let server = MockServer::start().await;
    mount_locations(&server).await;

    Mock::given(method("GET"))
        .and(path("/locations/loc_a/pipelines/v2"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token revoked"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/locations/loc_m/pipelines/v2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"pipelines": []})))
        .expect(0)
        .mount(&server)
        .await;

    let err = collector_for(&server, &[])
        .await
        .collect(now())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Authentication(_)));
}
