// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Training driver: the daily per-animal training cycle, the on-demand
//! fire-and-forget jobs behind the ML endpoints, and the hourly scoring
//! backfill for sessions that finalized without an active model.
//!
//! Progress is reported out-of-band on the `ml_training_status` system
//! channel; callers of the on-demand jobs get a 202 and watch the stream.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use uuid::Uuid;

use byre_forest::{codec, ForestParams, IsolationForest};

use crate::events::{ChannelKey, StreamEvent, ML_TRAINING_CHANNEL};
use crate::ml::features;
use crate::state::AppState;
use crate::store::{AnomalyScore, NewModel};

/// Trailing window the daily cycle trains on.
const TRAINING_WINDOW_DAYS: i64 = 30;

/// Batch limit per scoring-backfill cycle.
const SCORING_BATCH_LIMIT: usize = 1000;

/// Outcome of one per-animal training attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainOutcome {
    /// A new model version was trained and activated.
    Trained { version: String, sessions: usize },
    /// Too few sessions in the window; the prior model stays active.
    Skipped { sessions: usize },
}

fn publish_status(app: &AppState, status: &str, cow_id: Option<Uuid>, detail: Option<String>) {
    app.hub.publish(
        &ChannelKey::System(ML_TRAINING_CHANNEL.to_owned()),
        StreamEvent::TrainingStatus { status: status.to_owned(), cow_id, detail },
    );
}

/// Train (and transactionally activate) a model for one animal from its
/// trailing 30-day window.
pub async fn train_for_cow(app: &AppState, cow_id: Uuid) -> anyhow::Result<TrainOutcome> {
    let end = Utc::now();
    let start = end - ChronoDuration::days(TRAINING_WINDOW_DAYS);
    let sessions = app.store.sessions_for_training(cow_id, start, end).await?;

    if sessions.len() < app.config.min_training_sessions {
        tracing::debug!(cow_id = %cow_id, sessions = sessions.len(),
            "skipping training, not enough sessions in window");
        return Ok(TrainOutcome::Skipped { sessions: sessions.len() });
    }

    let data: Vec<Vec<f64>> =
        sessions.iter().map(|s| features::extract(s).to_vec()).collect();
    // Tree building is CPU-bound; keep it off the event loop.
    let forest = tokio::task::spawn_blocking(move || {
        let mut rng = rand::rng();
        IsolationForest::fit(&data, &ForestParams::default(), &mut rng)
    })
    .await??;

    let version = format!("iforest-v3-{}", end.format("%Y%m%d"));
    let metrics = serde_json::json!({
        "feature_count": features::FEATURE_COUNT,
        "session_count": sessions.len(),
        "anomaly_threshold": forest.threshold(),
    });
    app.store
        .activate_model(NewModel {
            model_id: Uuid::new_v4(),
            cow_id: Some(cow_id),
            model_version: version.clone(),
            model_data: codec::encode(&forest),
            metrics,
            training_data_start: start,
            training_data_end: end,
        })
        .await?;

    tracing::info!(cow_id = %cow_id, version = %version, sessions = sessions.len(),
        "model trained and activated");
    Ok(TrainOutcome::Trained { version, sessions: sessions.len() })
}

/// Train every animal in turn; abandons the sweep on shutdown.
pub async fn run_training_cycle(app: &AppState) {
    publish_status(app, "training_started", None, None);
    let cows = match app.store.all_cow_ids().await {
        Ok(cows) => cows,
        Err(e) => {
            tracing::error!(err = %e, "training cycle could not list animals");
            publish_status(app, "training_failed", None, Some(format!("{e:#}")));
            return;
        }
    };

    let mut trained = 0usize;
    for cow_id in cows {
        if app.shutdown.is_cancelled() {
            tracing::info!("training cycle abandoned on shutdown");
            return;
        }
        match train_for_cow(app, cow_id).await {
            Ok(TrainOutcome::Trained { version, .. }) => {
                trained += 1;
                publish_status(app, "model_trained", Some(cow_id), Some(version));
            }
            Ok(TrainOutcome::Skipped { .. }) => {}
            Err(e) => {
                tracing::error!(cow_id = %cow_id, err = %e, "training failed");
                publish_status(app, "training_failed", Some(cow_id), Some(format!("{e:#}")));
            }
        }
    }
    publish_status(app, "training_completed", None, Some(format!("{trained} models")));
}

/// On-demand single-animal job; mirrors the cycle's status reporting.
pub async fn run_training_job(app: &AppState, cow_id: Uuid) {
    publish_status(app, "training_started", Some(cow_id), None);
    match train_for_cow(app, cow_id).await {
        Ok(TrainOutcome::Trained { version, .. }) => {
            publish_status(app, "training_completed", Some(cow_id), Some(version));
        }
        Ok(TrainOutcome::Skipped { sessions }) => {
            publish_status(
                app,
                "training_skipped",
                Some(cow_id),
                Some(format!("{sessions} sessions in window")),
            );
        }
        Err(e) => {
            tracing::error!(cow_id = %cow_id, err = %e, "training failed");
            publish_status(app, "training_failed", Some(cow_id), Some(format!("{e:#}")));
        }
    }
}

/// One scoring-backfill pass: score every session with no anomaly verdict,
/// loading each animal's active model at most once.
///
/// Returns the number of verdicts written.
pub async fn run_scoring_cycle(app: &AppState) -> anyhow::Result<usize> {
    let unscored = app.store.unscored_sessions(SCORING_BATCH_LIMIT).await?;
    if unscored.is_empty() {
        return Ok(0);
    }
    tracing::debug!(sessions = unscored.len(), "scoring backfill started");

    // Cycle-local model cache; a None entry records a cow with no usable
    // model so it is not looked up again this cycle.
    let mut cache: HashMap<Uuid, Option<(Uuid, IsolationForest)>> = HashMap::new();
    let mut verdicts = Vec::new();

    for session in unscored {
        if !cache.contains_key(&session.cow_id) {
            let loaded = match app.store.active_model_for_cow(session.cow_id).await? {
                Some(stored) => match codec::decode(&stored.model_data) {
                    Ok(forest) => Some((stored.model_id, forest)),
                    Err(e) => {
                        tracing::warn!(model_id = %stored.model_id, err = %e,
                            "undecodable model artifact, cow skipped this cycle");
                        None
                    }
                },
                None => None,
            };
            cache.insert(session.cow_id, loaded);
        }
        let Some(Some((model_id, forest))) = cache.get(&session.cow_id) else {
            continue;
        };

        let vector = features::extract(&session);
        let score = forest.score(&vector);
        verdicts.push(AnomalyScore {
            model_id: *model_id,
            session_id: session.session_id,
            score,
            is_anomaly: score > forest.threshold(),
        });
    }

    let written = app.store.insert_anomaly_scores(verdicts).await?;
    if written > 0 {
        tracing::info!(written, "scoring backfill wrote verdicts");
    }
    Ok(written)
}

/// Seconds until the next occurrence of `hour:00` UTC after `now`.
fn until_next_hour(now: DateTime<Utc>, hour: u32) -> std::time::Duration {
    let hour = hour.min(23);
    let today = now
        .with_hour(hour)
        .and_then(|t| t.with_minute(0))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    let next = if today > now { today } else { today + ChronoDuration::days(1) };
    (next - now).to_std().unwrap_or_default()
}

/// Spawn the once-per-day training driver.
pub fn spawn_training_driver(app: Arc<AppState>) {
    tokio::spawn(async move {
        let shutdown = app.shutdown.clone();
        loop {
            let wait = until_next_hour(Utc::now(), app.config.training_hour);
            tracing::debug!(secs = wait.as_secs(), "training driver sleeping until next cycle");
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
            run_training_cycle(&app).await;
        }
        tracing::debug!("training driver stopped");
    });
}

/// Spawn the periodic scoring-backfill driver.
pub fn spawn_scoring_driver(app: Arc<AppState>) {
    tokio::spawn(async move {
        let shutdown = app.shutdown.clone();
        let mut tick = tokio::time::interval(app.config.scoring_interval());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }
            if let Err(e) = run_scoring_cycle(&app).await {
                tracing::error!(err = %e, "scoring cycle failed");
            }
        }
        tracing::debug!("scoring driver stopped");
    });
}

#[cfg(test)]
#[path = "trainer_tests.rs"]
mod tests;
