// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daily and weekly rollup endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::auth::{ensure_cow_access, AuthFarmer};
use crate::error::ApiError;
use crate::state::AppState;
use crate::store::{DailySummary, SessionDetail};

#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DailySummaryResponse {
    pub days: Vec<DailySummary>,
}

/// `GET /api/v1/cows/{cow_id}/daily-summary?days=N`: per-day totals for the
/// last N days (default 7), oldest day first.
pub async fn daily_summary(
    State(app): State<Arc<AppState>>,
    Path(cow_id): Path<Uuid>,
    Query(query): Query<DaysQuery>,
    farmer: AuthFarmer,
) -> Result<Json<DailySummaryResponse>, ApiError> {
    ensure_cow_access(&app, cow_id, &farmer).await?;
    let days = query.days.unwrap_or(7).clamp(1, 90);
    let since = Utc::now() - Duration::days(days);
    let days = app.store.daily_summary(cow_id, since).await?;
    Ok(Json(DailySummaryResponse { days }))
}

#[derive(Debug, Serialize)]
pub struct WeeklySummaryResponse {
    pub current_week: WeekRollup,
    pub previous_week: WeekRollup,
}

#[derive(Debug, Serialize)]
pub struct WeekRollup {
    pub week_start: String,
    pub week_end: String,
    pub days: Vec<DayRollup>,
}

#[derive(Debug, Serialize)]
pub struct DayRollup {
    pub date: String,
    pub total_sessions: i64,
    pub total_duration_secs: f64,
    pub total_consumption: f64,
    pub avg_temperature: Option<f64>,
    pub anomaly_count: i64,
    pub sessions: Vec<SessionDetail>,
}

/// `GET /api/v1/cows/{cow_id}/weekly-summary`: the current and previous
/// week (Monday-based), each with its daily breakdown and per-day sessions.
pub async fn weekly_summary(
    State(app): State<Arc<AppState>>,
    Path(cow_id): Path<Uuid>,
    farmer: AuthFarmer,
) -> Result<Json<WeeklySummaryResponse>, ApiError> {
    ensure_cow_access(&app, cow_id, &farmer).await?;

    let today = Utc::now().date_naive();
    let week_start = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
    let prev_start = week_start - Duration::days(7);

    let since = prev_start
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .ok_or_else(|| ApiError::Internal("week start out of range".to_owned()))?;

    let totals = app.store.daily_summary(cow_id, since).await?;
    let sessions = app.store.session_list(cow_id, Some(since), None).await?;

    let totals_by_day: HashMap<String, DailySummary> =
        totals.into_iter().map(|d| (d.date.clone(), d)).collect();
    let mut sessions_by_day: HashMap<String, Vec<SessionDetail>> = HashMap::new();
    for session in sessions {
        sessions_by_day
            .entry(session.time_start.date_naive().to_string())
            .or_default()
            .push(session);
    }

    let build_week = |start: NaiveDate| -> WeekRollup {
        let days = (0..7)
            .map(|offset| {
                let date = (start + Duration::days(offset)).to_string();
                let mut sessions = sessions_by_day.get(&date).cloned().unwrap_or_default();
                // Listings are newest-first; per-day breakdowns read better
                // in chronological order.
                sessions.reverse();
                match totals_by_day.get(&date) {
                    Some(t) => DayRollup {
                        date,
                        total_sessions: t.total_sessions,
                        total_duration_secs: t.total_duration_secs,
                        total_consumption: t.total_consumption,
                        avg_temperature: t.avg_temperature,
                        anomaly_count: t.anomaly_count,
                        sessions,
                    },
                    None => DayRollup {
                        date,
                        total_sessions: 0,
                        total_duration_secs: 0.0,
                        total_consumption: 0.0,
                        avg_temperature: None,
                        anomaly_count: 0,
                        sessions,
                    },
                }
            })
            .collect();
        WeekRollup {
            week_start: start.to_string(),
            week_end: (start + Duration::days(6)).to_string(),
            days,
        }
    };

    Ok(Json(WeeklySummaryResponse {
        current_week: build_week(week_start),
        previous_week: build_week(prev_start),
    }))
}
