// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for unit tests: a default config, an in-memory app state,
//! and sample builders.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::ingest::Sample;
use crate::state::AppState;
use crate::store::{EatSession, Sex, Store};

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        db_path: ":memory:".into(),
        broker_url: "nats://127.0.0.1:4222".into(),
        topic_prefix: "herd.telemetry".into(),
        jwt_secret: None,
        jwt_ttl_minutes: 60,
        smtp_host: None,
        smtp_port: 587,
        smtp_username: None,
        smtp_password: None,
        session_timeout_secs: 60,
        noise_threshold: 0.02,
        weight_start_threshold: 0.5,
        buffer_size: 100,
        flush_interval_secs: 5,
        buffer_high_water: 10_000,
        reaper_interval_secs: 10,
        training_hour: 2,
        min_training_sessions: 10,
        scoring_interval_secs: 3600,
    }
}

pub fn test_app() -> anyhow::Result<Arc<AppState>> {
    test_app_with(test_config())
}

pub fn test_app_with(config: Config) -> anyhow::Result<Arc<AppState>> {
    let store = Store::open_in_memory()?;
    Ok(Arc::new(AppState::new(config, store, CancellationToken::new())))
}

/// A fixed, readable base instant for deterministic tests.
pub fn t0() -> DateTime<Utc> {
    // A Monday, 08:00 UTC.
    Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub fn sample(device: &str, tag: Option<&str>, weight: f64, at: DateTime<Utc>) -> Sample {
    Sample {
        timestamp: at,
        device_id: device.to_owned(),
        rfid_id: tag.map(str::to_owned),
        weight: Some(weight),
        temperature_c: Some(21.5),
        ip: Some("10.0.0.7".to_owned()),
    }
}

/// Seed a farmer, one cow, and an open tag assignment; returns the cow id.
pub async fn seed_cow(app: &AppState, tag: &str, at: DateTime<Utc>) -> anyhow::Result<Uuid> {
    let farmer = app.store.create_farmer("Ayu", "ayu@example.com", "x").await?;
    let cow = app.store.create_cow(farmer, "Sri", Sex::Female).await?;
    app.store.register_tag(tag).await?;
    app.store.assign_tag(tag, cow, at - Duration::days(1)).await?;
    Ok(cow)
}

/// Mint an HS256 JWT the way the account service does, for auth tests.
pub fn sign_jwt(secret: &str, sub: Uuid, exp: i64) -> String {
    sign_jwt_with_header(secret, r#"{"alg":"HS256","typ":"JWT"}"#, sub, exp)
}

pub fn sign_jwt_with_header(secret: &str, header: &str, sub: Uuid, exp: i64) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    let header_b64 = URL_SAFE_NO_PAD.encode(header);
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::json!({ "sub": sub, "exp": exp }).to_string());
    let input = format!("{header_b64}.{payload_b64}");
    let key = ring::hmac::Key::new(ring::hmac::HMAC_SHA256, secret.as_bytes());
    let tag = ring::hmac::sign(&key, input.as_bytes());
    format!("{input}.{}", URL_SAFE_NO_PAD.encode(tag.as_ref()))
}

/// A viable finished session starting at `start` for feature/scoring tests.
pub fn session_at(cow_id: Uuid, start: DateTime<Utc>) -> EatSession {
    EatSession {
        session_id: Uuid::new_v4(),
        device_id: "feeder-1".into(),
        rfid_id: "tag-1".into(),
        cow_id,
        time_start: start,
        time_end: start + Duration::minutes(30),
        weight_start: 7.0,
        weight_end: 5.2,
        average_temp: 22.0,
    }
}
