// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker subscriber: consumes `{prefix}.>` from the telemetry broker and
//! drives the per-sample dispatch: session state machine first, then the
//! write-behind buffer, then the buffer's flush triggers.
//!
//! The subscription is supervised: on connection loss the in-memory raw
//! buffer is flushed to bound loss, then reconnection is retried with at
//! least [`RECONNECT_DELAY`] between attempts.

pub mod buffer;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use futures_util::StreamExt;

use crate::state::AppState;

/// Minimum delay between broker reconnection attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// One decoded telemetry sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub rfid_id: Option<String>,
    pub weight: Option<f64>,
    pub temperature_c: Option<f64>,
    pub ip: Option<String>,
}

/// Spawn the broker subscriber as a supervised background task.
pub fn spawn_subscriber(app: Arc<AppState>) {
    tokio::spawn(async move {
        run_subscriber(app).await;
    });
}

async fn run_subscriber(app: Arc<AppState>) {
    let shutdown = app.shutdown.clone();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            result = connect_and_consume(&app) => {
                match result {
                    Ok(()) => break, // shutdown observed inside the consume loop
                    Err(e) => {
                        tracing::warn!(err = %e, "telemetry subscription lost, reconnecting");
                    }
                }
            }
        }

        // Bound raw-sample loss while the broker is away.
        if let Err(e) = app.buffer.flush(&app.store).await {
            tracing::warn!(err = %e, "buffer flush after broker drop failed");
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }

    if let Err(e) = app.buffer.flush(&app.store).await {
        tracing::warn!(err = %e, "buffer flush on subscriber shutdown failed");
    }
    tracing::debug!("telemetry subscriber stopped");
}

async fn connect_and_consume(app: &Arc<AppState>) -> anyhow::Result<()> {
    let client = async_nats::connect(app.config.broker_url.as_str()).await?;
    let subject = format!("{}.>", app.config.topic_prefix);
    let mut sub = client.subscribe(subject.clone()).await?;
    tracing::info!(url = %app.config.broker_url, subject = %subject, "telemetry subscriber connected");

    loop {
        tokio::select! {
            _ = app.shutdown.cancelled() => return Ok(()),
            msg = sub.next() => {
                let Some(msg) = msg else {
                    anyhow::bail!("telemetry subscription closed");
                };
                let Some(sample) = decode_telemetry(&msg.payload, Utc::now()) else {
                    continue;
                };
                session::handle_sample(app, &sample).await;
                app.buffer.push(sample);
                if app.buffer.should_flush() {
                    if let Err(e) = app.buffer.flush(&app.store).await {
                        tracing::warn!(err = %e, "raw buffer flush failed, batch re-queued");
                    }
                }
            }
        }
    }
}

/// Decode one telemetry payload; malformed messages are logged and dropped.
///
/// `now` substitutes for a missing or unparseable client timestamp.
pub(crate) fn decode_telemetry(payload: &[u8], now: DateTime<Utc>) -> Option<Sample> {
    #[derive(serde::Deserialize)]
    struct Telemetry {
        id: Option<String>,
        #[serde(default)]
        rfid: Option<String>,
        #[serde(default)]
        w: Option<f64>,
        #[serde(default)]
        temp: Option<f64>,
        #[serde(default)]
        ip: Option<String>,
        #[serde(default)]
        ts: Option<String>,
    }

    let msg: Telemetry = match serde_json::from_slice(payload) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(err = %e, "dropping malformed telemetry payload");
            return None;
        }
    };

    let Some(device_id) = msg.id.filter(|id| !id.is_empty()) else {
        tracing::debug!("dropping telemetry payload without device id");
        return None;
    };

    let timestamp = match msg.ts.as_deref() {
        Some(raw) => parse_instant(raw).unwrap_or_else(|| {
            tracing::debug!(ts = raw, "unparseable telemetry timestamp, using server clock");
            now
        }),
        None => now,
    };

    Some(Sample {
        timestamp,
        device_id,
        rfid_id: msg.rfid,
        weight: msg.w,
        temperature_c: msg.temp,
        ip: msg.ip,
    })
}

/// Parse an ISO-8601 instant; naive timestamps are taken as UTC.
fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
