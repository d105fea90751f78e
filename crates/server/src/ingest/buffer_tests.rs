// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use chrono::Duration as ChronoDuration;

use super::*;
use crate::test_support::{sample, t0};

fn buffer(flush_size: usize, flush_interval: Duration) -> RawBuffer {
    RawBuffer::new(flush_size, flush_interval, 10_000)
}

#[test]
fn count_trigger_fires_at_the_threshold() {
    let buf = buffer(3, Duration::from_secs(3600));
    buf.push(sample("feeder-1", Some("tag-1"), 7.0, t0()));
    buf.push(sample("feeder-1", Some("tag-1"), 6.9, t0()));
    assert!(!buf.should_flush(), "below the count threshold");
    buf.push(sample("feeder-1", Some("tag-1"), 6.8, t0()));
    assert!(buf.should_flush(), "count threshold reached");
}

#[test]
fn time_trigger_fires_once_elapsed() {
    let buf = buffer(100, Duration::ZERO);
    assert!(!buf.should_flush(), "an empty buffer never flushes");
    buf.push(sample("feeder-1", Some("tag-1"), 7.0, t0()));
    assert!(buf.should_flush(), "time since last flush exceeds a zero interval");
}

#[tokio::test]
async fn flush_persists_and_resets_the_trigger() -> anyhow::Result<()> {
    let store = Store::open_in_memory()?;
    let buf = buffer(2, Duration::from_secs(3600));
    buf.push(sample("feeder-1", Some("tag-1"), 7.0, t0()));
    buf.push(sample("feeder-1", Some("tag-1"), 6.9, t0() + ChronoDuration::seconds(5)));

    assert_eq!(buf.flush(&store).await?, 2);
    assert!(buf.is_empty());
    assert!(!buf.should_flush());

    let rows: i64 = store
        .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM sensor_sample", [], |r| r.get(0))?))
        .await?;
    assert_eq!(rows, 2);
    Ok(())
}

#[tokio::test]
async fn flush_of_an_empty_buffer_is_a_noop() -> anyhow::Result<()> {
    let store = Store::open_in_memory()?;
    let buf = buffer(2, Duration::from_secs(3600));
    assert_eq!(buf.flush(&store).await?, 0);
    Ok(())
}

#[tokio::test]
async fn failed_flush_requeues_the_batch_in_order() -> anyhow::Result<()> {
    let store = Store::open_in_memory()?;
    let buf = buffer(10, Duration::from_secs(3600));
    for i in 0..4 {
        buf.push(sample(
            &format!("feeder-{i}"),
            Some("tag-1"),
            7.0,
            t0() + ChronoDuration::seconds(i),
        ));
    }

    // Break the sample table so the insert fails inside the transaction.
    store.call(|conn| Ok(conn.execute_batch("DROP TABLE sensor_sample")?)).await?;
    assert!(buf.flush(&store).await.is_err());
    assert_eq!(buf.len(), 4, "failed batch returns to the buffer");

    // Repair and retry: the same batch lands, still in order.
    store
        .call(|conn| {
            Ok(conn.execute_batch(
                "CREATE TABLE sensor_sample (
                     timestamp INTEGER NOT NULL,
                     device_id TEXT NOT NULL REFERENCES device(device_id),
                     rfid_id TEXT REFERENCES rfid_tag(rfid_id),
                     weight REAL, temperature_c REAL, ip TEXT)",
            )?)
        })
        .await?;
    assert_eq!(buf.flush(&store).await?, 4);

    let devices: Vec<String> = store
        .call(|conn| {
            let mut stmt =
                conn.prepare("SELECT device_id FROM sensor_sample ORDER BY rowid")?;
            let rows = stmt
                .query_map([], |r| r.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await?;
    assert_eq!(devices, vec!["feeder-0", "feeder-1", "feeder-2", "feeder-3"]);
    Ok(())
}

#[test]
fn push_reports_the_buffered_count() {
    let buf = buffer(100, Duration::from_secs(3600));
    assert_eq!(buf.push(sample("feeder-1", None, 7.0, t0())), 1);
    assert_eq!(buf.push(sample("feeder-1", None, 7.0, t0())), 2);
}
