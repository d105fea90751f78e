// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Raw-sample persistence: the flush target of the write-behind buffer and
//! the ownership-joined history query behind the read API.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use super::{instant_col, to_ms, SensorRow, Store};
use crate::ingest::Sample;

/// Hard cap on history rows per query, matching the original backend.
const HISTORY_LIMIT: usize = 1000;

impl Store {
    /// Persist one flush batch in a single transaction.
    ///
    /// Referential integrity dictates the order: device upserts first (most
    /// recent instant per device wins), then tag registration, then the
    /// append-only sample insert.
    pub async fn flush_raw(&self, batch: Vec<Sample>) -> anyhow::Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        self.call(move |conn| {
            let tx = conn.transaction()?;

            let mut devices: HashMap<&str, (Option<&str>, i64)> = HashMap::new();
            for sample in &batch {
                let ts = to_ms(sample.timestamp);
                let entry = devices
                    .entry(sample.device_id.as_str())
                    .or_insert((sample.ip.as_deref(), ts));
                if ts >= entry.1 {
                    *entry = (sample.ip.as_deref(), ts);
                }
            }
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO device (device_id, status, last_ip, last_seen)
                     VALUES (?1, 'ONLINE', ?2, ?3)
                     ON CONFLICT(device_id) DO UPDATE SET
                         status = 'ONLINE',
                         last_ip = excluded.last_ip,
                         last_seen = excluded.last_seen",
                )?;
                for (device_id, (ip, last_seen)) in &devices {
                    stmt.execute(params![device_id, ip, last_seen])?;
                }
            }

            {
                let now = to_ms(Utc::now());
                let mut tags: Vec<&str> =
                    batch.iter().filter_map(|s| s.rfid_id.as_deref()).collect();
                tags.sort_unstable();
                tags.dedup();
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO rfid_tag (rfid_id, created_at) VALUES (?1, ?2)",
                )?;
                for tag in tags {
                    stmt.execute(params![tag, now])?;
                }
            }

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO sensor_sample
                         (timestamp, device_id, rfid_id, weight, temperature_c, ip)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for sample in &batch {
                    stmt.execute(params![
                        to_ms(sample.timestamp),
                        sample.device_id,
                        sample.rfid_id,
                        sample.weight,
                        sample.temperature_c,
                        sample.ip,
                    ])?;
                }
            }

            tx.commit()?;
            Ok(batch.len())
        })
        .await
    }

    /// Raw samples attributable to `cow_id` over `[start, end]`.
    ///
    /// A sample counts only while its tag's ownership window covered the
    /// animal at the sample's instant, so history survives tag reassignment.
    pub async fn sensor_history(
        &self,
        cow_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<SensorRow>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT s.timestamp, s.device_id, s.rfid_id, s.weight, s.temperature_c, s.ip
                 FROM sensor_sample s
                 JOIN rfid_ownership o ON o.rfid_id = s.rfid_id
                     AND o.cow_id = ?1
                     AND s.timestamp >= o.time_start
                     AND (o.time_end IS NULL OR s.timestamp <= o.time_end)
                 WHERE s.timestamp BETWEEN ?2 AND ?3
                 ORDER BY s.timestamp DESC
                 LIMIT ?4",
            )?;
            let rows = stmt
                .query_map(
                    params![cow_id.to_string(), to_ms(start), to_ms(end), HISTORY_LIMIT],
                    |row| {
                        Ok(SensorRow {
                            timestamp: instant_col(row, 0)?,
                            device_id: row.get(1)?,
                            rfid_id: row.get(2)?,
                            weight: row.get(3)?,
                            temperature_c: row.get(4)?,
                            ip: row.get(5)?,
                        })
                    },
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }
}

#[cfg(test)]
#[path = "samples_tests.rs"]
mod tests;
