// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the byre daemon.
///
/// Every knob is environment-overridable so the container deployment can
/// stay flag-free.  Weight values are opaque scalars; the thresholds must be
/// expressed in the same unit the feeders report.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "byre", about = "Cattle feeder telemetry backend")]
pub struct Config {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "BYRE_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9040, env = "BYRE_PORT")]
    pub port: u16,

    /// SQLite database path.
    #[arg(long, default_value = "byre.db", env = "BYRE_DB")]
    pub db_path: String,

    /// NATS server URL for the telemetry broker.
    #[arg(long, default_value = "nats://127.0.0.1:4222", env = "BYRE_BROKER_URL")]
    pub broker_url: String,

    /// Telemetry subject prefix; the subscriber consumes `{prefix}.>`.
    #[arg(long, default_value = "herd.telemetry", env = "BYRE_TOPIC_PREFIX")]
    pub topic_prefix: String,

    /// HS256 secret for dashboard JWTs. If unset, auth is disabled.
    #[arg(long, env = "BYRE_JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Token lifetime in minutes (issued by the account service).
    #[arg(long, default_value_t = 60, env = "BYRE_JWT_TTL_MINUTES")]
    pub jwt_ttl_minutes: u64,

    /// SMTP relay host for the notification collaborator.
    #[arg(long, env = "BYRE_SMTP_HOST")]
    pub smtp_host: Option<String>,

    /// SMTP relay port.
    #[arg(long, default_value_t = 587, env = "BYRE_SMTP_PORT")]
    pub smtp_port: u16,

    /// SMTP username.
    #[arg(long, env = "BYRE_SMTP_USERNAME")]
    pub smtp_username: Option<String>,

    /// SMTP password.
    #[arg(long, env = "BYRE_SMTP_PASSWORD")]
    pub smtp_password: Option<String>,

    /// Seconds without consumption before the reaper closes a session.
    #[arg(long, default_value_t = 60, env = "BYRE_SESSION_TIMEOUT_SECS")]
    pub session_timeout_secs: u64,

    /// Weight delta at or below this is treated as load-cell jitter.
    #[arg(long, default_value_t = 0.02, env = "BYRE_NOISE_THRESHOLD")]
    pub noise_threshold: f64,

    /// Minimum plausible starting feed mass for a session to open.
    #[arg(long, default_value_t = 0.5, env = "BYRE_WEIGHT_START_THRESHOLD")]
    pub weight_start_threshold: f64,

    /// Raw-sample count that triggers a buffer flush.
    #[arg(long, default_value_t = 100, env = "BYRE_BUFFER_SIZE")]
    pub buffer_size: usize,

    /// Seconds since the last successful flush that trigger a flush.
    #[arg(long, default_value_t = 5, env = "BYRE_FLUSH_INTERVAL_SECS")]
    pub flush_interval_secs: u64,

    /// Buffered-sample count past which backpressure is logged.
    #[arg(long, default_value_t = 10_000, env = "BYRE_BUFFER_HIGH_WATER")]
    pub buffer_high_water: usize,

    /// Reaper scan interval in seconds.
    #[arg(long, default_value_t = 10, env = "BYRE_REAPER_INTERVAL_SECS")]
    pub reaper_interval_secs: u64,

    /// Wall-clock hour (UTC) of the daily training cycle.
    #[arg(long, default_value_t = 2, env = "BYRE_TRAINING_HOUR")]
    pub training_hour: u32,

    /// Minimum sessions in the training window before a model is trained.
    #[arg(long, default_value_t = 10, env = "BYRE_MIN_TRAINING_SESSIONS")]
    pub min_training_sessions: usize,

    /// Seconds between scoring-backfill cycles.
    #[arg(long, default_value_t = 3600, env = "BYRE_SCORING_INTERVAL_SECS")]
    pub scoring_interval_secs: u64,
}

impl Config {
    pub fn session_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_timeout_secs as i64)
    }

    pub fn flush_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.flush_interval_secs)
    }

    pub fn reaper_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn scoring_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.scoring_interval_secs)
    }
}
