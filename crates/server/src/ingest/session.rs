// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-device eating-session state machine.
//!
//! Live state exists only while a session is open on a device and is owned
//! by [`SessionTracker`] behind a mutex that is never held across I/O.  The
//! subscriber task is the single writer in the steady state; the reaper only
//! removes timed-out entries.  Transitions are decided synchronously under
//! the lock and return work (events to publish, candidates to finalize) that
//! the async driver executes afterwards, so any interleaving of samples and
//! reaper ticks observes a consistent map.
//!
//! Timeout arithmetic runs against **last consumption**, not last seen: a
//! stationary cow that stopped eating is done even while it still trips the
//! RFID reader.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::events::{ChannelKey, StreamEvent};
use crate::ingest::Sample;
use crate::state::AppState;
use crate::store::{AnomalyScore, EatSession};

/// State-machine thresholds, fixed at process init.
#[derive(Debug, Clone)]
pub struct Thresholds {
    /// Weight drop at or below this is load-cell jitter, not consumption.
    pub noise: f64,
    /// Minimum plausible starting feed mass for a session to open.
    pub weight_start: f64,
    /// Inactivity cutoff measured against last consumption.
    pub session_timeout: chrono::Duration,
}

/// Live state for one device's active session.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSession {
    pub rfid_id: String,
    pub cow_id: Uuid,
    pub time_start: DateTime<Utc>,
    pub weight_start: f64,
    pub last_seen: DateTime<Utc>,
    pub last_consumption: DateTime<Utc>,
    pub last_weight: f64,
    pub temp_sum: f64,
    pub temp_count: u32,
}

/// A closed session awaiting the finalize path.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCandidate {
    pub device_id: String,
    pub rfid_id: String,
    pub cow_id: Uuid,
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,
    pub weight_start: f64,
    pub weight_end: f64,
    pub average_temp: f64,
}

impl SessionCandidate {
    /// A candidate persists only if time moved forward and feed was consumed.
    pub fn viable(&self) -> bool {
        self.time_end > self.time_start && self.weight_end < self.weight_start
    }
}

/// Close a live session using its last-known weight and last-seen instant.
pub fn close_candidate(device_id: &str, live: &LiveSession) -> SessionCandidate {
    let average_temp = if live.temp_count > 0 {
        live.temp_sum / f64::from(live.temp_count)
    } else {
        0.0
    };
    SessionCandidate {
        device_id: device_id.to_owned(),
        rfid_id: live.rfid_id.clone(),
        cow_id: live.cow_id,
        time_start: live.time_start,
        time_end: live.last_seen,
        weight_start: live.weight_start,
        weight_end: live.last_weight,
        average_temp,
    }
}

/// What `handle_sample` decided under the lock; executed after release.
enum Transition {
    /// No session action (sample still reaches the raw buffer).
    Pass,
    /// Rule 2: same tag, state updated in place.
    Updated { cow_id: Uuid },
    /// Rule 3: tag changed, session closed; a new one may open from this
    /// sample.
    Closed(SessionCandidate),
    /// Rule 1: no active session; this sample may open one.
    MaybeOpen,
}

pub struct SessionTracker {
    live: Mutex<HashMap<String, LiveSession>>,
    thresholds: Thresholds,
}

impl SessionTracker {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { live: Mutex::new(HashMap::new()), thresholds }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn active_count(&self) -> usize {
        self.guard().len()
    }

    /// Snapshot of a device's live session, for tests and introspection.
    pub fn snapshot(&self, device_id: &str) -> Option<LiveSession> {
        self.guard().get(device_id).cloned()
    }

    /// Whether `sample` satisfies the session-open gate (rule 1): a tag is
    /// present and the weight is a plausible starting feed mass.
    pub fn qualifies_start(&self, sample: &Sample) -> Option<(String, f64)> {
        let tag = sample.rfid_id.clone()?;
        let weight = sample.weight?;
        (weight > self.thresholds.weight_start).then_some((tag, weight))
    }

    /// Open a session from `sample` for the resolved animal.
    pub fn open(&self, sample: &Sample, rfid_id: String, cow_id: Uuid, weight: f64) {
        let (temp_sum, temp_count) = match sample.temperature_c {
            Some(t) => (t, 1),
            None => (0.0, 0),
        };
        let live = LiveSession {
            rfid_id,
            cow_id,
            time_start: sample.timestamp,
            weight_start: weight,
            last_seen: sample.timestamp,
            last_consumption: sample.timestamp,
            last_weight: weight,
            temp_sum,
            temp_count,
        };
        self.guard().insert(sample.device_id.clone(), live);
    }

    /// Apply one sample to the live map and return the resulting transition.
    fn apply(&self, sample: &Sample) -> Transition {
        let mut live = self.guard();
        let Some(session) = live.get_mut(&sample.device_id) else {
            return Transition::MaybeOpen;
        };

        if sample.rfid_id.as_deref() == Some(session.rfid_id.as_str()) {
            session.last_seen = sample.timestamp;
            if let Some(weight) = sample.weight {
                let delta = session.last_weight - weight;
                if delta > self.thresholds.noise {
                    session.last_consumption = sample.timestamp;
                }
                session.last_weight = weight;
            }
            if let Some(temp) = sample.temperature_c {
                session.temp_sum += temp;
                session.temp_count += 1;
            }
            return Transition::Updated { cow_id: session.cow_id };
        }

        match live.remove(&sample.device_id) {
            Some(closed) => Transition::Closed(close_candidate(&sample.device_id, &closed)),
            None => Transition::Pass,
        }
    }

    /// Remove and return every session idle past the timeout at `now`.
    ///
    /// Strictly greater-than: a session whose last consumption sits exactly
    /// on the cutoff survives this tick.
    pub fn reap(&self, now: DateTime<Utc>) -> Vec<(String, LiveSession)> {
        let mut live = self.guard();
        let expired: Vec<String> = live
            .iter()
            .filter(|(_, s)| now - s.last_consumption > self.thresholds.session_timeout)
            .map(|(device, _)| device.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|device| live.remove(&device).map(|s| (device, s)))
            .collect()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<String, LiveSession>> {
        match self.live.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Per-sample dispatch: rules 1–3 of the state machine.
pub async fn handle_sample(app: &AppState, sample: &Sample) {
    match app.tracker.apply(sample) {
        Transition::Pass => {}
        Transition::Updated { cow_id } => {
            app.hub.publish(
                &ChannelKey::Animal(cow_id),
                StreamEvent::SensorUpdate {
                    cow_id,
                    device_id: sample.device_id.clone(),
                    timestamp: sample.timestamp,
                    weight: sample.weight,
                    temperature_c: sample.temperature_c,
                },
            );
        }
        Transition::Closed(candidate) => {
            if let Err(e) = finalize(app, candidate).await {
                tracing::error!(device_id = %sample.device_id, err = %e,
                    "session finalization failed");
            }
            try_open(app, sample).await;
        }
        Transition::MaybeOpen => try_open(app, sample).await,
    }
}

/// Rule 1: open a session when the gate passes and the tag resolves to an
/// animal through an open ownership window.
async fn try_open(app: &AppState, sample: &Sample) {
    let Some((rfid_id, weight)) = app.tracker.qualifies_start(sample) else {
        return;
    };
    let cow_id = match app.store.resolve_open_tag(&rfid_id).await {
        Ok(Some(cow_id)) => cow_id,
        Ok(None) => {
            tracing::debug!(rfid_id = %rfid_id, device_id = %sample.device_id,
                "ignoring session start for unassigned tag");
            return;
        }
        Err(e) => {
            tracing::warn!(rfid_id = %rfid_id, err = %e, "tag resolution failed");
            return;
        }
    };
    app.tracker.open(sample, rfid_id, cow_id, weight);
    tracing::info!(cow_id = %cow_id, device_id = %sample.device_id, "session opened");
}

/// Finalize a closed candidate: score it against the active model, persist
/// session (+ verdict) in one logical step, and broadcast `session_end`.
///
/// Returns the persisted session id, or `None` for discarded candidates.
pub async fn finalize(app: &AppState, candidate: SessionCandidate) -> anyhow::Result<Option<Uuid>> {
    if !candidate.viable() {
        tracing::debug!(device_id = %candidate.device_id, cow_id = %candidate.cow_id,
            "discarding session candidate without net consumption");
        return Ok(None);
    }

    let session = EatSession {
        session_id: Uuid::new_v4(),
        device_id: candidate.device_id,
        rfid_id: candidate.rfid_id,
        cow_id: candidate.cow_id,
        time_start: candidate.time_start,
        time_end: candidate.time_end,
        weight_start: candidate.weight_start,
        weight_end: candidate.weight_end,
        average_temp: candidate.average_temp,
    };

    let features = crate::ml::features::extract(&session);
    let verdict = match app.store.active_model_for_cow(session.cow_id).await {
        Ok(Some(stored)) => match byre_forest::codec::decode(&stored.model_data) {
            Ok(forest) => {
                let score = forest.score(&features);
                Some(AnomalyScore {
                    model_id: stored.model_id,
                    session_id: session.session_id,
                    score,
                    is_anomaly: score > forest.threshold(),
                })
            }
            Err(e) => {
                tracing::warn!(model_id = %stored.model_id, err = %e,
                    "undecodable model artifact, session left unscored");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(cow_id = %session.cow_id, err = %e,
                "active-model lookup failed, session left unscored");
            None
        }
    };

    app.store.insert_session(session.clone(), verdict).await?;
    tracing::info!(cow_id = %session.cow_id, device_id = %session.device_id,
        session_id = %session.session_id, "session finalized");

    app.hub.publish(
        &ChannelKey::Animal(session.cow_id),
        StreamEvent::SessionEnd {
            cow_id: session.cow_id,
            device_id: session.device_id,
            session_id: session.session_id,
            time_start: session.time_start,
            time_end: session.time_end,
            total_consumption: session.weight_start - session.weight_end,
            average_temp: session.average_temp,
            is_anomaly: verdict.map(|v| v.is_anomaly),
            anomaly_score: verdict.map(|v| v.score),
        },
    );
    Ok(Some(session.session_id))
}

/// One reaper pass at `now`: broadcast `session_timeout`, then finalize each
/// expired session with its last weight and last-seen instant.
pub async fn reap_once(app: &AppState, now: DateTime<Utc>) {
    for (device_id, live) in app.tracker.reap(now) {
        tracing::info!(cow_id = %live.cow_id, device_id = %device_id,
            "session timed out, finalizing");
        app.hub.publish(
            &ChannelKey::Animal(live.cow_id),
            StreamEvent::SessionTimeout {
                cow_id: live.cow_id,
                device_id: device_id.clone(),
                timestamp: now,
            },
        );
        let candidate = close_candidate(&device_id, &live);
        if let Err(e) = finalize(app, candidate).await {
            tracing::error!(device_id = %device_id, err = %e,
                "timed-out session finalization failed");
        }
    }
}

/// Spawn the cooperative inactivity reaper.
pub fn spawn_reaper(app: Arc<AppState>) {
    tokio::spawn(async move {
        let shutdown = app.shutdown.clone();
        let mut tick = tokio::time::interval(app.config.reaper_interval());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }
            reap_once(&app, Utc::now()).await;
        }
        tracing::debug!("session reaper stopped");
    });
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
