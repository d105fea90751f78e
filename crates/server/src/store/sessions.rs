// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Eating-session persistence, listings, and rollups.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use super::{instant_col, to_ms, uuid_col, AnomalyRecord, AnomalyScore, DailySummary, EatSession, SessionDetail, Store};

fn session_row(row: &Row<'_>) -> rusqlite::Result<EatSession> {
    Ok(EatSession {
        session_id: uuid_col(row, 0)?,
        device_id: row.get(1)?,
        rfid_id: row.get(2)?,
        cow_id: uuid_col(row, 3)?,
        time_start: instant_col(row, 4)?,
        time_end: instant_col(row, 5)?,
        weight_start: row.get(6)?,
        weight_end: row.get(7)?,
        average_temp: row.get(8)?,
    })
}

const SESSION_COLUMNS: &str = "session_id, device_id, rfid_id, cow_id, \
     time_start, time_end, weight_start, weight_end, average_temp";

impl Store {
    /// Persist a finalized session and, when a model scored it, its anomaly
    /// verdict.
    ///
    /// The session insert commits on its own: if the anomaly write fails the
    /// session row must survive so the scoring backfill can retry it later.
    /// Returns whether the anomaly row was written.
    pub async fn insert_session(
        &self,
        session: EatSession,
        anomaly: Option<AnomalyScore>,
    ) -> anyhow::Result<bool> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO eat_session
                     (session_id, device_id, rfid_id, cow_id,
                      time_start, time_end, weight_start, weight_end, average_temp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    session.session_id.to_string(),
                    session.device_id,
                    session.rfid_id,
                    session.cow_id.to_string(),
                    to_ms(session.time_start),
                    to_ms(session.time_end),
                    session.weight_start,
                    session.weight_end,
                    session.average_temp,
                ],
            )?;

            let Some(verdict) = anomaly else { return Ok(false) };
            match conn.execute(
                "INSERT OR IGNORE INTO anomaly (model_id, session_id, anomaly_score, is_anomaly)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    verdict.model_id.to_string(),
                    verdict.session_id.to_string(),
                    verdict.score,
                    verdict.is_anomaly,
                ],
            ) {
                Ok(n) => Ok(n > 0),
                Err(e) => {
                    // The session row is already durable; the scoring cycle
                    // will pick this session up again.
                    tracing::warn!(session_id = %session.session_id, err = %e,
                        "anomaly write failed after session insert");
                    Ok(false)
                }
            }
        })
        .await
    }

    /// Sessions for one animal inside a training window, oldest first.
    pub async fn sessions_for_training(
        &self,
        cow_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<EatSession>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM eat_session
                 WHERE cow_id = ?1 AND time_start BETWEEN ?2 AND ?3
                 ORDER BY time_start"
            ))?;
            let rows = stmt
                .query_map(
                    params![cow_id.to_string(), to_ms(start), to_ms(end)],
                    session_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    /// Sessions with no anomaly verdict yet, oldest first, bounded.
    pub async fn unscored_sessions(&self, limit: usize) -> anyhow::Result<Vec<EatSession>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM eat_session e
                 WHERE NOT EXISTS (SELECT 1 FROM anomaly a WHERE a.session_id = e.session_id)
                 ORDER BY e.time_start
                 LIMIT ?1"
            ))?;
            let rows = stmt
                .query_map(params![limit], session_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    /// Session listing for the read API, newest first.
    pub async fn session_list(
        &self,
        cow_id: Uuid,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<SessionDetail>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT e.session_id, e.time_start, e.time_end,
                        e.weight_start, e.weight_end, e.average_temp,
                        a.is_anomaly, a.anomaly_score
                 FROM eat_session e
                 LEFT JOIN anomaly a ON a.session_id = e.session_id
                 WHERE e.cow_id = ?1 AND e.time_start >= ?2 AND e.time_start <= ?3
                 ORDER BY e.time_start DESC",
            )?;
            let lo = start.map(to_ms).unwrap_or(i64::MIN);
            let hi = end.map(to_ms).unwrap_or(i64::MAX);
            let rows = stmt
                .query_map(params![cow_id.to_string(), lo, hi], |row| {
                    let time_start = instant_col(row, 1)?;
                    let time_end = instant_col(row, 2)?;
                    let weight_start: f64 = row.get(3)?;
                    let weight_end: f64 = row.get(4)?;
                    let duration_secs =
                        (time_end - time_start).num_milliseconds() as f64 / 1000.0;
                    let total_consumption = weight_start - weight_end;
                    let rate_per_min = if duration_secs > 0.0 {
                        total_consumption / duration_secs * 60.0
                    } else {
                        0.0
                    };
                    Ok(SessionDetail {
                        session_id: uuid_col(row, 0)?,
                        time_start,
                        time_end,
                        duration_secs,
                        total_consumption,
                        rate_per_min,
                        average_temp: row.get(5)?,
                        is_anomaly: row.get(6)?,
                        anomaly_score: row.get(7)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    /// Per-day totals for an animal since `since`, oldest day first.
    pub async fn daily_summary(
        &self,
        cow_id: Uuid,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<DailySummary>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT date(e.time_start / 1000, 'unixepoch') AS day,
                        COUNT(*),
                        SUM((e.time_end - e.time_start) / 1000.0),
                        SUM(e.weight_start - e.weight_end),
                        AVG(e.average_temp),
                        SUM(CASE WHEN a.is_anomaly = 1 THEN 1 ELSE 0 END)
                 FROM eat_session e
                 LEFT JOIN anomaly a ON a.session_id = e.session_id
                 WHERE e.cow_id = ?1 AND e.time_start >= ?2
                 GROUP BY day
                 ORDER BY day",
            )?;
            let rows = stmt
                .query_map(params![cow_id.to_string(), to_ms(since)], |row| {
                    Ok(DailySummary {
                        date: row.get(0)?,
                        total_sessions: row.get(1)?,
                        total_duration_secs: row.get(2)?,
                        total_consumption: row.get(3)?,
                        avg_temperature: row.get(4)?,
                        anomaly_count: row.get(5)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    /// Anomalous sessions for a farmer (optionally narrowed to one animal),
    /// newest first.
    pub async fn anomaly_listing(
        &self,
        farmer_id: Option<Uuid>,
        cow_id: Option<Uuid>,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<AnomalyRecord>> {
        self.call(move |conn| {
            let base = "SELECT a.session_id, e.cow_id, c.name, e.time_end,
                               a.anomaly_score, a.is_anomaly, e.average_temp
                        FROM anomaly a
                        JOIN eat_session e ON e.session_id = a.session_id
                        JOIN cow c ON c.cow_id = e.cow_id
                        WHERE a.is_anomaly = 1 AND e.time_end >= ?1";
            let map = |row: &Row<'_>| {
                Ok(AnomalyRecord {
                    session_id: uuid_col(row, 0)?,
                    cow_id: uuid_col(row, 1)?,
                    cow_name: row.get(2)?,
                    timestamp: instant_col(row, 3)?,
                    anomaly_score: row.get(4)?,
                    is_anomaly: row.get::<_, i64>(5)? != 0,
                    average_temp: row.get(6)?,
                })
            };
            let rows = match (cow_id, farmer_id) {
                (Some(cow), _) => {
                    let mut stmt = conn.prepare(&format!(
                        "{base} AND e.cow_id = ?2 ORDER BY e.time_end DESC"
                    ))?;
                    let r = stmt
                        .query_map(params![to_ms(since), cow.to_string()], map)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    r
                }
                (None, Some(farmer)) => {
                    let mut stmt = conn.prepare(&format!(
                        "{base} AND c.farmer_id = ?2 ORDER BY e.time_end DESC"
                    ))?;
                    let r = stmt
                        .query_map(params![to_ms(since), farmer.to_string()], map)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    r
                }
                (None, None) => {
                    let mut stmt =
                        conn.prepare(&format!("{base} ORDER BY e.time_end DESC"))?;
                    let r = stmt
                        .query_map(params![to_ms(since)], map)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    r
                }
            };
            Ok(rows)
        })
        .await
    }
}

#[cfg(test)]
#[path = "sessions_tests.rs"]
mod tests;
