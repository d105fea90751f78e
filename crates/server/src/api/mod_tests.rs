// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum_test::TestServer;
use chrono::{Duration, Utc};
use uuid::Uuid;

use super::*;
use crate::store::Sex;
use crate::test_support::{session_at, sign_jwt, t0, test_app_with, test_config};

const SECRET: &str = "router-secret";

fn secured_server() -> anyhow::Result<(TestServer, std::sync::Arc<AppState>)> {
    let mut config = test_config();
    config.jwt_secret = Some(SECRET.to_owned());
    let app = test_app_with(config)?;
    let server = TestServer::new(build_router(app.clone()))
        .map_err(|e| anyhow::anyhow!("test server: {e}"))?;
    Ok((server, app))
}

fn token_for(farmer: Uuid) -> String {
    sign_jwt(SECRET, farmer, (Utc::now() + Duration::hours(1)).timestamp())
}

#[tokio::test]
async fn health_needs_no_auth() -> anyhow::Result<()> {
    let (server, _app) = secured_server()?;
    let response = server.get("/api/v1/health").await;
    response.assert_status(StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["db"], "ok");
    Ok(())
}

#[tokio::test]
async fn missing_token_is_unauthorized() -> anyhow::Result<()> {
    let (server, _app) = secured_server()?;
    let response = server.get(&format!("/api/v1/cows/{}/sessions", Uuid::new_v4())).await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    Ok(())
}

#[tokio::test]
async fn owner_reads_their_cow_sessions() -> anyhow::Result<()> {
    let (server, app) = secured_server()?;
    let farmer = app.store.create_farmer("Ayu", "ayu@example.com", "x").await?;
    let cow = app.store.create_cow(farmer, "Sri", Sex::Female).await?;
    app.store.register_tag("tag-1").await?;
    app.store.insert_session(session_at(cow, t0()), None).await?;

    let response = server
        .get(&format!("/api/v1/cows/{cow}/sessions"))
        .add_header("authorization", format!("Bearer {}", token_for(farmer)))
        .await;
    response.assert_status(StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["sessions"].as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn foreign_cow_is_forbidden_and_unknown_is_not_found() -> anyhow::Result<()> {
    let (server, app) = secured_server()?;
    let owner = app.store.create_farmer("Ayu", "ayu@example.com", "x").await?;
    let intruder = app.store.create_farmer("Budi", "budi@example.com", "x").await?;
    let cow = app.store.create_cow(owner, "Sri", Sex::Female).await?;

    let response = server
        .get(&format!("/api/v1/cows/{cow}/sensor-history"))
        .add_header("authorization", format!("Bearer {}", token_for(intruder)))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);

    let response = server
        .get(&format!("/api/v1/cows/{}/sensor-history", Uuid::new_v4()))
        .add_header("authorization", format!("Bearer {}", token_for(owner)))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn sse_token_may_ride_the_query_string() -> anyhow::Result<()> {
    // EventSource clients cannot set headers; a bad query token must still
    // be rejected, and a valid one accepted by the auth layer (exercised on
    // a plain endpoint to avoid holding a stream open).
    let (server, app) = secured_server()?;
    let farmer = app.store.create_farmer("Ayu", "ayu@example.com", "x").await?;
    let cow = app.store.create_cow(farmer, "Sri", Sex::Female).await?;

    let response = server
        .get(&format!("/api/v1/cows/{cow}/sessions?token=not-a-jwt"))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    let response = server
        .get(&format!("/api/v1/cows/{cow}/sessions?token={}", token_for(farmer)))
        .await;
    response.assert_status(StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn ml_triggers_return_accepted() -> anyhow::Result<()> {
    let (server, app) = secured_server()?;
    let farmer = app.store.create_farmer("Ayu", "ayu@example.com", "x").await?;

    let response = server
        .post("/api/v1/ml/train")
        .add_header("authorization", format!("Bearer {}", token_for(farmer)))
        .await;
    response.assert_status(StatusCode::ACCEPTED);

    let response = server
        .post("/api/v1/ml/score")
        .add_header("authorization", format!("Bearer {}", token_for(farmer)))
        .await;
    response.assert_status(StatusCode::ACCEPTED);
    Ok(())
}

#[tokio::test]
async fn anomaly_listing_is_scoped_to_the_caller() -> anyhow::Result<()> {
    let (server, app) = secured_server()?;
    let farmer = app.store.create_farmer("Ayu", "ayu@example.com", "x").await?;
    let other = app.store.create_farmer("Budi", "budi@example.com", "x").await?;
    let cow = app.store.create_cow(farmer, "Sri", Sex::Female).await?;
    app.store.register_tag("tag-1").await?;

    let model = crate::store::NewModel {
        model_id: Uuid::new_v4(),
        cow_id: Some(cow),
        model_version: "iforest-v3-test".into(),
        model_data: vec![1, 2, 3],
        metrics: serde_json::json!({}),
        training_data_start: Utc::now() - Duration::days(30),
        training_data_end: Utc::now(),
    };
    let model_id = model.model_id;
    app.store.activate_model(model).await?;

    let session = session_at(cow, Utc::now() - Duration::hours(1));
    let verdict = crate::store::AnomalyScore {
        model_id,
        session_id: session.session_id,
        score: -0.5,
        is_anomaly: true,
    };
    app.store.insert_session(session, Some(verdict)).await?;

    let response = server
        .get("/api/v1/anomalies")
        .add_header("authorization", format!("Bearer {}", token_for(farmer)))
        .await;
    response.assert_status(StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["anomalies"].as_array().map(Vec::len), Some(1));

    let response = server
        .get("/api/v1/anomalies")
        .add_header("authorization", format!("Bearer {}", token_for(other)))
        .await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["anomalies"].as_array().map(Vec::len), Some(0));
    Ok(())
}
