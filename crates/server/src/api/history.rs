// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sensor-history and session-list read endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::auth::{ensure_cow_access, AuthFarmer};
use crate::error::ApiError;
use crate::state::AppState;
use crate::store::{SensorRow, SessionDetail};

const DEFAULT_HISTORY_HOURS: i64 = 24;
const MAX_HISTORY_HOURS: i64 = 720;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub hours: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub samples: Vec<SensorRow>,
}

/// `GET /api/v1/cows/{cow_id}/sensor-history?hours=N`
///
/// Raw samples over the trailing window, attributed through the ownership
/// join; useful for seeding a dashboard chart before the SSE stream starts.
pub async fn sensor_history(
    State(app): State<Arc<AppState>>,
    Path(cow_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
    farmer: AuthFarmer,
) -> Result<Json<HistoryResponse>, ApiError> {
    ensure_cow_access(&app, cow_id, &farmer).await?;
    let hours = query.hours.unwrap_or(DEFAULT_HISTORY_HOURS).clamp(1, MAX_HISTORY_HOURS);
    let end = Utc::now();
    let start = end - Duration::hours(hours);
    let samples = app.store.sensor_history(cow_id, start, end).await?;
    Ok(Json(HistoryResponse { samples }))
}

#[derive(Debug, Deserialize)]
pub struct SessionRangeQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionDetail>,
}

/// `GET /api/v1/cows/{cow_id}/sessions?start=&end=`, newest first.
pub async fn session_list(
    State(app): State<Arc<AppState>>,
    Path(cow_id): Path<Uuid>,
    Query(query): Query<SessionRangeQuery>,
    farmer: AuthFarmer,
) -> Result<Json<SessionListResponse>, ApiError> {
    ensure_cow_access(&app, cow_id, &farmer).await?;
    if let (Some(start), Some(end)) = (query.start, query.end) {
        if end < start {
            return Err(ApiError::BadRequest("end precedes start".to_owned()));
        }
    }
    let sessions = app.store.session_list(cow_id, query.start, query.end).await?;
    Ok(Json(SessionListResponse { sessions }))
}
