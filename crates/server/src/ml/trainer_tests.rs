// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use chrono::{Duration, TimeZone, Utc};
use uuid::Uuid;

use super::*;
use crate::state::AppState;
use crate::test_support::{seed_cow, session_at, t0, test_app};

/// Insert `count` recent sessions so the trailing training window sees them.
async fn insert_recent_sessions(
    app: &AppState,
    cow_id: Uuid,
    count: usize,
) -> anyhow::Result<()> {
    let base = Utc::now() - Duration::days(2);
    for i in 0..count {
        let mut session = session_at(cow_id, base + Duration::hours(i as i64));
        // Vary the candidates a little so the forest sees spread.
        session.weight_end = 5.2 - (i % 5) as f64 * 0.1;
        app.store.insert_session(session, None).await?;
    }
    Ok(())
}

#[tokio::test]
async fn training_skips_below_the_minimum() -> anyhow::Result<()> {
    let app = test_app()?;
    let cow = seed_cow(&app, "tag-1", t0()).await?;
    insert_recent_sessions(&app, cow, 5).await?;

    let outcome = train_for_cow(&app, cow).await?;
    assert_eq!(outcome, TrainOutcome::Skipped { sessions: 5 });
    assert_eq!(app.store.active_model_count(Some(cow)).await?, 0);
    Ok(())
}

#[tokio::test]
async fn training_twice_leaves_exactly_one_active_model() -> anyhow::Result<()> {
    let app = test_app()?;
    let cow = seed_cow(&app, "tag-1", t0()).await?;
    insert_recent_sessions(&app, cow, 12).await?;

    let first = train_for_cow(&app, cow).await?;
    assert!(matches!(first, TrainOutcome::Trained { sessions: 12, .. }));
    assert_eq!(app.store.active_model_count(Some(cow)).await?, 1);

    // Re-training supersedes, never duplicates.
    let second = train_for_cow(&app, cow).await?;
    assert!(matches!(second, TrainOutcome::Trained { .. }));
    assert_eq!(app.store.active_model_count(Some(cow)).await?, 1);

    let total: i64 = app
        .store
        .call(move |conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM ml_model WHERE cow_id = ?1",
                [cow.to_string()],
                |r| r.get(0),
            )?)
        })
        .await?;
    assert_eq!(total, 2, "the superseded model row is kept, inactive");
    Ok(())
}

#[tokio::test]
async fn scoring_cycle_is_idempotent() -> anyhow::Result<()> {
    let app = test_app()?;
    let cow = seed_cow(&app, "tag-1", t0()).await?;
    insert_recent_sessions(&app, cow, 12).await?;
    train_for_cow(&app, cow).await?;

    let written = run_scoring_cycle(&app).await?;
    assert_eq!(written, 12, "every unscored session gets a verdict");
    assert_eq!(run_scoring_cycle(&app).await?, 0, "second pass writes nothing");
    Ok(())
}

#[tokio::test]
async fn sessions_without_a_model_wait_for_backfill() -> anyhow::Result<()> {
    let app = test_app()?;
    let cow = seed_cow(&app, "tag-1", t0()).await?;

    // Sessions land while no model is active: nothing to score yet.
    insert_recent_sessions(&app, cow, 12).await?;
    assert_eq!(run_scoring_cycle(&app).await?, 0);

    // Once a model activates, the hourly cycle picks them up.
    train_for_cow(&app, cow).await?;
    assert_eq!(run_scoring_cycle(&app).await?, 12);
    Ok(())
}

#[tokio::test]
async fn scoring_prefers_the_per_animal_model_over_global() -> anyhow::Result<()> {
    let app = test_app()?;
    let cow = seed_cow(&app, "tag-1", t0()).await?;
    insert_recent_sessions(&app, cow, 12).await?;
    train_for_cow(&app, cow).await?;

    // Activate a global fallback as well; the per-animal model must win.
    let global_id = Uuid::new_v4();
    let sessions = app
        .store
        .sessions_for_training(cow, Utc::now() - Duration::days(30), Utc::now())
        .await?;
    let data: Vec<Vec<f64>> = sessions.iter().map(|s| features::extract(s).to_vec()).collect();
    use rand::SeedableRng;
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let forest = byre_forest::IsolationForest::fit(
        &data,
        &byre_forest::ForestParams::default(),
        &mut rng,
    )?;
    app.store
        .activate_model(crate::store::NewModel {
            model_id: global_id,
            cow_id: None,
            model_version: "iforest-v3-global".into(),
            model_data: byre_forest::codec::encode(&forest),
            metrics: serde_json::json!({}),
            training_data_start: Utc::now() - Duration::days(30),
            training_data_end: Utc::now(),
        })
        .await?;

    let extra = session_at(cow, Utc::now() - Duration::hours(1));
    let extra_id = extra.session_id;
    app.store.insert_session(extra, None).await?;
    run_scoring_cycle(&app).await?;

    let model_used: String = app
        .store
        .call(move |conn| {
            Ok(conn.query_row(
                "SELECT model_id FROM anomaly WHERE session_id = ?1",
                [extra_id.to_string()],
                |r| r.get(0),
            )?)
        })
        .await?;
    assert_ne!(model_used, global_id.to_string(), "per-animal model takes precedence");
    Ok(())
}

#[test]
fn next_training_run_is_the_coming_occurrence_of_the_hour() {
    let at = |h, m| {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0)
            .single()
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC)
    };
    assert_eq!(until_next_hour(at(1, 0), 2).as_secs(), 3600);
    assert_eq!(until_next_hour(at(2, 0), 2).as_secs(), 86_400, "exactly on the hour waits a day");
    assert_eq!(until_next_hour(at(3, 30), 2).as_secs(), 81_000);
}
