// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Anomaly listings for a farmer's herd.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::auth::{ensure_cow_access, AuthFarmer};
use crate::error::ApiError;
use crate::state::AppState;
use crate::store::AnomalyRecord;

#[derive(Debug, Deserialize)]
pub struct AnomalyQuery {
    pub cow_id: Option<Uuid>,
    pub days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AnomalyListResponse {
    pub anomalies: Vec<AnomalyRecord>,
}

/// `GET /api/v1/anomalies?cow_id=&days=N`: anomalous sessions across the
/// caller's herd (or one animal), newest first.
pub async fn list_anomalies(
    State(app): State<Arc<AppState>>,
    Query(query): Query<AnomalyQuery>,
    farmer: AuthFarmer,
) -> Result<Json<AnomalyListResponse>, ApiError> {
    if let Some(cow_id) = query.cow_id {
        ensure_cow_access(&app, cow_id, &farmer).await?;
    }
    let days = query.days.unwrap_or(7).clamp(1, 365);
    let since = Utc::now() - Duration::days(days);
    let anomalies = app.store.anomaly_listing(farmer.0, query.cow_id, since).await?;
    Ok(Json(AnomalyListResponse { anomalies }))
}
