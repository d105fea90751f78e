// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport: router assembly, middleware, and the health probe.

pub mod anomaly;
pub mod auth;
pub mod history;
pub mod ml;
pub mod rollup;
pub mod sse;

use std::sync::Arc;

use axum::extract::State;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::state::AppState;

/// Build the axum `Router` with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/api/v1/health", get(health))
        // Read API
        .route("/api/v1/cows/{cow_id}/sensor-history", get(history::sensor_history))
        .route("/api/v1/cows/{cow_id}/sessions", get(history::session_list))
        .route("/api/v1/cows/{cow_id}/daily-summary", get(rollup::daily_summary))
        .route("/api/v1/cows/{cow_id}/weekly-summary", get(rollup::weekly_summary))
        .route("/api/v1/anomalies", get(anomaly::list_anomalies))
        // ML triggers
        .route("/api/v1/ml/train", post(ml::train_all))
        .route("/api/v1/ml/train/{cow_id}", post(ml::train_cow))
        .route("/api/v1/ml/score", post(ml::score_now))
        // Streaming
        .route("/api/v1/stream/cows/{cow_id}", get(sse::stream_cow))
        .route("/api/v1/stream/ml-status", get(sse::stream_ml_status))
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    db: &'static str,
    buffered_samples: usize,
    active_sessions: usize,
}

async fn health(State(app): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    app.store
        .health()
        .await
        .map_err(|e| ApiError::Unavailable(format!("store: {e:#}")))?;
    Ok(Json(HealthResponse {
        status: "ok",
        db: "ok",
        buffered_samples: app.buffer.len(),
        active_sessions: app.tracker.active_count(),
    }))
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
