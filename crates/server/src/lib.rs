// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Byre: real-time ingestion and session-reconstruction backend for
//! networked cattle feeders.
//!
//! Telemetry flows broker → subscriber → (write-behind buffer → store) and
//! (session state machine → scorer → store → pub/sub hub → SSE clients).
//! Training and scoring backfill run as independent supervised tasks.

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod hub;
pub mod ingest;
pub mod ml;
pub mod state;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::state::AppState;
use crate::store::Store;

/// Run the daemon until shutdown.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let store = Store::open(&config.db_path)?;
    let app = Arc::new(AppState::new(config, store, shutdown.clone()));

    ingest::spawn_subscriber(Arc::clone(&app));
    ingest::buffer::spawn_flusher(Arc::clone(&app));
    ingest::session::spawn_reaper(Arc::clone(&app));
    ml::trainer::spawn_training_driver(Arc::clone(&app));
    ml::trainer::spawn_scoring_driver(Arc::clone(&app));

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    tracing::info!("byre listening on {addr}");
    let router = api::build_router(Arc::clone(&app));
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    // The flusher makes its own final attempt on cancellation; one more here
    // bounds loss if the serve loop exited before the flusher's pass.
    if let Err(e) = app.buffer.flush(&app.store).await {
        tracing::warn!(err = %e, lost = app.buffer.len(), "final buffer flush failed");
    }
    Ok(())
}
