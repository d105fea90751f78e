// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed gateway over the relational store.
//!
//! rusqlite is synchronous, so every operation runs its closure on the
//! blocking pool via [`Store::call`]; async callers never hold a connection
//! across a suspension point.  The schema is applied idempotently at open.
//!
//! Two invariants from the data model are enforced here by partial unique
//! indexes rather than by application discipline alone: at most one open
//! ownership window per tag, and at most one active model per
//! (animal, global) partition.

pub mod herd;
pub mod models;
pub mod samples;
pub mod sessions;

use chrono::{DateTime, Utc};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::Row;
use serde::Serialize;
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS farmer (
    farmer_id     TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    email         TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS cow (
    cow_id        TEXT PRIMARY KEY,
    farmer_id     TEXT NOT NULL REFERENCES farmer(farmer_id),
    name          TEXT NOT NULL,
    date_of_birth TEXT,
    sex           TEXT NOT NULL DEFAULT 'UNKNOWN' CHECK (sex IN ('MALE','FEMALE','UNKNOWN')),
    created_at    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS cow_pregnancy (
    pregnancy_id INTEGER PRIMARY KEY AUTOINCREMENT,
    cow_id       TEXT NOT NULL REFERENCES cow(cow_id),
    time_start   INTEGER NOT NULL,
    time_end     INTEGER,
    CHECK (time_end IS NULL OR time_end >= time_start)
);

CREATE TABLE IF NOT EXISTS rfid_tag (
    rfid_id    TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS rfid_ownership (
    ownership_id INTEGER PRIMARY KEY AUTOINCREMENT,
    rfid_id      TEXT NOT NULL REFERENCES rfid_tag(rfid_id),
    cow_id       TEXT NOT NULL REFERENCES cow(cow_id),
    time_start   INTEGER NOT NULL,
    time_end     INTEGER
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_rfid_ownership_open
    ON rfid_ownership (rfid_id) WHERE time_end IS NULL;
CREATE INDEX IF NOT EXISTS idx_rfid_ownership_cow
    ON rfid_ownership (cow_id, time_start);

CREATE TABLE IF NOT EXISTS device (
    device_id TEXT PRIMARY KEY,
    status    TEXT NOT NULL DEFAULT 'OFFLINE' CHECK (status IN ('ONLINE','OFFLINE')),
    last_ip   TEXT,
    last_seen INTEGER
);

CREATE TABLE IF NOT EXISTS sensor_sample (
    timestamp     INTEGER NOT NULL,
    device_id     TEXT NOT NULL REFERENCES device(device_id),
    rfid_id       TEXT REFERENCES rfid_tag(rfid_id),
    weight        REAL,
    temperature_c REAL,
    ip            TEXT
);
CREATE INDEX IF NOT EXISTS idx_sensor_sample_tag_ts
    ON sensor_sample (rfid_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_sensor_sample_device_ts
    ON sensor_sample (device_id, timestamp);

CREATE TABLE IF NOT EXISTS eat_session (
    session_id   TEXT PRIMARY KEY,
    device_id    TEXT NOT NULL,
    rfid_id      TEXT NOT NULL REFERENCES rfid_tag(rfid_id),
    cow_id       TEXT NOT NULL REFERENCES cow(cow_id),
    time_start   INTEGER NOT NULL,
    time_end     INTEGER NOT NULL,
    weight_start REAL NOT NULL,
    weight_end   REAL NOT NULL,
    average_temp REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_eat_session_cow_ts
    ON eat_session (cow_id, time_start);

CREATE TABLE IF NOT EXISTS ml_model (
    model_id            TEXT PRIMARY KEY,
    cow_id              TEXT REFERENCES cow(cow_id),
    model_version       TEXT NOT NULL,
    model_data          BLOB NOT NULL,
    training_data_start INTEGER NOT NULL,
    training_data_end   INTEGER NOT NULL,
    metrics             TEXT NOT NULL,
    is_active           INTEGER NOT NULL DEFAULT 0
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_ml_model_active
    ON ml_model (COALESCE(cow_id, '')) WHERE is_active = 1;

CREATE TABLE IF NOT EXISTS anomaly (
    model_id      TEXT NOT NULL REFERENCES ml_model(model_id),
    session_id    TEXT NOT NULL REFERENCES eat_session(session_id),
    anomaly_score REAL NOT NULL,
    is_anomaly    INTEGER NOT NULL,
    PRIMARY KEY (model_id, session_id)
);
";

/// Handle to the relational store; cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: r2d2::Pool<SqliteConnectionManager>,
}

impl Store {
    /// Open (or create) a file-backed store and apply the schema.
    pub fn open(path: &str) -> anyhow::Result<Self> {
        if path == ":memory:" {
            return Self::open_in_memory();
        }
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")
        });
        Self::build(manager, 8)
    }

    /// In-memory store for tests; a single pooled connection so every caller
    /// sees the same database.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.pragma_update(None, "foreign_keys", "ON"));
        Self::build(manager, 1)
    }

    fn build(manager: SqliteConnectionManager, max_size: u32) -> anyhow::Result<Self> {
        let pool = r2d2::Pool::builder().max_size(max_size).build(manager)?;
        pool.get()?.execute_batch(SCHEMA)?;
        Ok(Self { pool })
    }

    /// Run a store round-trip on the blocking pool.
    pub async fn call<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        Ok(tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await??)
    }

    /// Liveness probe for the health endpoint.
    pub async fn health(&self) -> anyhow::Result<()> {
        self.call(|conn| {
            let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
            anyhow::ensure!(one == 1, "health probe returned {one}");
            Ok(())
        })
        .await
    }
}

// ── Row types ─────────────────────────────────────────────────────────────

/// Animal sex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sex {
    Male,
    Female,
    Unknown,
}

impl Sex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "MALE",
            Self::Female => "FEMALE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// A persisted (or about-to-be persisted) eating session.
#[derive(Debug, Clone, PartialEq)]
pub struct EatSession {
    pub session_id: Uuid,
    pub device_id: String,
    pub rfid_id: String,
    pub cow_id: Uuid,
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,
    pub weight_start: f64,
    pub weight_end: f64,
    pub average_temp: f64,
}

/// One anomaly verdict for (model, session).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyScore {
    pub model_id: Uuid,
    pub session_id: Uuid,
    pub score: f64,
    pub is_anomaly: bool,
}

/// A model row as read back for scoring.
#[derive(Debug, Clone)]
pub struct StoredModel {
    pub model_id: Uuid,
    pub cow_id: Option<Uuid>,
    pub model_version: String,
    pub model_data: Vec<u8>,
}

/// A freshly trained model awaiting activation.
#[derive(Debug, Clone)]
pub struct NewModel {
    pub model_id: Uuid,
    pub cow_id: Option<Uuid>,
    pub model_version: String,
    pub model_data: Vec<u8>,
    pub metrics: serde_json::Value,
    pub training_data_start: DateTime<Utc>,
    pub training_data_end: DateTime<Utc>,
}

/// One raw telemetry row from the sensor stream.
#[derive(Debug, Clone, Serialize)]
pub struct SensorRow {
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub rfid_id: Option<String>,
    pub weight: Option<f64>,
    pub temperature_c: Option<f64>,
    pub ip: Option<String>,
}

/// A session as listed by the read API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    pub session_id: Uuid,
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,
    pub duration_secs: f64,
    pub total_consumption: f64,
    pub rate_per_min: f64,
    pub average_temp: f64,
    pub is_anomaly: Option<bool>,
    pub anomaly_score: Option<f64>,
}

/// One day of rollup totals.
#[derive(Debug, Clone, Serialize)]
pub struct DailySummary {
    pub date: String,
    pub total_sessions: i64,
    pub total_duration_secs: f64,
    pub total_consumption: f64,
    pub avg_temperature: Option<f64>,
    pub anomaly_count: i64,
}

/// One anomalous session in a farmer-facing listing.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyRecord {
    pub session_id: Uuid,
    pub cow_id: Uuid,
    pub cow_name: String,
    pub timestamp: DateTime<Utc>,
    pub anomaly_score: f64,
    pub is_anomaly: bool,
    pub average_temp: f64,
}

// ── Column helpers ────────────────────────────────────────────────────────

pub(crate) fn to_ms(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

pub(crate) fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Read a TEXT uuid column, surfacing parse failures as conversion errors.
pub(crate) fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Read an INTEGER epoch-millis column as a UTC instant.
pub(crate) fn instant_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(from_ms(row.get(idx)?))
}
