// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-format events published through the hub and delivered over SSE.
//!
//! Every frame carries an `event` discriminant so dashboard clients can
//! dispatch without sniffing payload fields.  Animal-channel events carry the
//! `cow_id` they were published under; system-channel events carry whatever
//! the producing task reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// System channel that carries training-cycle progress.
pub const ML_TRAINING_CHANNEL: &str = "ml_training_status";

/// Key of a hub channel: one per animal, plus named system channels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    Animal(Uuid),
    System(String),
}

impl ChannelKey {
    /// The channel name echoed back in the `connected` frame.
    pub fn name(&self) -> String {
        match self {
            Self::Animal(cow_id) => cow_id.to_string(),
            Self::System(name) => name.clone(),
        }
    }
}

/// Events fanned out to SSE subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    /// First frame of every SSE response.
    Connected { channel: String },
    /// A live session produced a fresh sample.
    SensorUpdate {
        cow_id: Uuid,
        device_id: String,
        timestamp: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        weight: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        temperature_c: Option<f64>,
    },
    /// A session was finalized and persisted.
    SessionEnd {
        cow_id: Uuid,
        device_id: String,
        session_id: Uuid,
        time_start: DateTime<Utc>,
        time_end: DateTime<Utc>,
        total_consumption: f64,
        average_temp: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_anomaly: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        anomaly_score: Option<f64>,
    },
    /// The reaper is about to close an idle session.
    SessionTimeout { cow_id: Uuid, device_id: String, timestamp: DateTime<Utc> },
    /// Training-cycle progress on the system channel.
    TrainingStatus {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cow_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
