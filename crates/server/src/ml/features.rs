// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic session → feature-vector mapping.
//!
//! The order and formulas are part of the model contract: artifacts trained
//! against this layout are scored against it, so any change here requires a
//! new model version.

use chrono::{Datelike, Timelike};

use crate::store::EatSession;

/// Fixed feature-vector width.
pub const FEATURE_COUNT: usize = 7;

/// Extract the feature vector for one session.
///
/// Order: duration minutes, total consumption, rate per minute, hour-of-start
/// sine, hour-of-start cosine, day-of-week (0 = Monday), mean temperature.
/// Non-finite intermediate values map to zero.
pub fn extract(session: &EatSession) -> [f64; FEATURE_COUNT] {
    let duration_secs =
        (session.time_end - session.time_start).num_milliseconds() as f64 / 1000.0;
    let duration_min = duration_secs / 60.0;
    let total_consumption = session.weight_start - session.weight_end;
    let rate_per_min = if duration_secs > 0.0 {
        total_consumption / duration_secs * 60.0
    } else {
        0.0
    };

    let hour = f64::from(session.time_start.hour());
    let angle = std::f64::consts::TAU * hour / 24.0;
    let day_of_week = f64::from(session.time_start.weekday().num_days_from_monday());

    [
        sanitize(duration_min),
        sanitize(total_consumption),
        sanitize(rate_per_min),
        sanitize(angle.sin()),
        sanitize(angle.cos()),
        sanitize(day_of_week),
        sanitize(session.average_temp),
    ]
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
#[path = "features_tests.rs"]
mod tests;
