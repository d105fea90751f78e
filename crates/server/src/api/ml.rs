// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-demand ML jobs: fire-and-forget training and scoring triggers.
//!
//! Handlers return 202 immediately; progress arrives on the
//! `ml_training_status` stream.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::api::auth::{ensure_cow_access, AuthFarmer};
use crate::error::ApiError;
use crate::ml::trainer;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub message: String,
}

fn accepted(message: &str) -> (StatusCode, Json<AcceptedResponse>) {
    (StatusCode::ACCEPTED, Json(AcceptedResponse { message: message.to_owned() }))
}

/// `POST /api/v1/ml/train`: train models for every animal in background.
pub async fn train_all(
    State(app): State<Arc<AppState>>,
    _farmer: AuthFarmer,
) -> (StatusCode, Json<AcceptedResponse>) {
    tokio::spawn(async move {
        trainer::run_training_cycle(&app).await;
    });
    accepted("training cycle started")
}

/// `POST /api/v1/ml/train/{cow_id}`: train one animal in background.
pub async fn train_cow(
    State(app): State<Arc<AppState>>,
    Path(cow_id): Path<Uuid>,
    farmer: AuthFarmer,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    ensure_cow_access(&app, cow_id, &farmer).await?;
    tokio::spawn(async move {
        trainer::run_training_job(&app, cow_id).await;
    });
    Ok(accepted("training started"))
}

/// `POST /api/v1/ml/score`: run one scoring-backfill cycle in background.
pub async fn score_now(
    State(app): State<Arc<AppState>>,
    _farmer: AuthFarmer,
) -> (StatusCode, Json<AcceptedResponse>) {
    tokio::spawn(async move {
        if let Err(e) = trainer::run_scoring_cycle(&app).await {
            tracing::error!(err = %e, "on-demand scoring cycle failed");
        }
    });
    accepted("scoring cycle started")
}
