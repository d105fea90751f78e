// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::hub::Hub;
use crate::ingest::buffer::RawBuffer;
use crate::ingest::session::{SessionTracker, Thresholds};
use crate::store::Store;

/// Shared daemon state, constructed once at process init and threaded through
/// every task and handler.
pub struct AppState {
    pub config: Config,
    pub store: Store,
    pub hub: Hub,
    pub tracker: SessionTracker,
    pub buffer: RawBuffer,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config, store: Store, shutdown: CancellationToken) -> Self {
        let tracker = SessionTracker::new(Thresholds {
            noise: config.noise_threshold,
            weight_start: config.weight_start_threshold,
            session_timeout: config.session_timeout(),
        });
        let buffer = RawBuffer::new(
            config.buffer_size,
            config.flush_interval(),
            config.buffer_high_water,
        );
        Self { config, store, hub: Hub::new(), tracker, buffer, shutdown }
    }
}
