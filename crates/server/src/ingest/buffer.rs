// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Write-behind buffer for raw telemetry.
//!
//! Samples accumulate in memory and reach the store in batches, triggered by
//! count or by wall time since the last *successful* flush.  A failed batch
//! is spliced back to the head of the buffer; nothing is dropped silently.
//! the buffer is the steady-state backpressure valve, and only abnormal
//! process exit loses samples.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::ingest::Sample;
use crate::state::AppState;
use crate::store::Store;

pub struct RawBuffer {
    samples: Mutex<VecDeque<Sample>>,
    last_flush: Mutex<Instant>,
    flush_size: usize,
    flush_interval: Duration,
    high_water: usize,
}

impl RawBuffer {
    pub fn new(flush_size: usize, flush_interval: Duration, high_water: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::new()),
            last_flush: Mutex::new(Instant::now()),
            flush_size: flush_size.max(1),
            flush_interval,
            high_water,
        }
    }

    /// Enqueue one sample; returns the buffered count.
    pub fn push(&self, sample: Sample) -> usize {
        let len = {
            let mut samples = lock(&self.samples);
            samples.push_back(sample);
            samples.len()
        };
        if len == self.high_water {
            tracing::warn!(buffered = len, "raw buffer crossed its high-water mark");
        }
        len
    }

    pub fn len(&self) -> usize {
        lock(&self.samples).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.samples).is_empty()
    }

    /// Whether either flush trigger (count or elapsed time) has fired.
    pub fn should_flush(&self) -> bool {
        let len = self.len();
        if len == 0 {
            return false;
        }
        len >= self.flush_size || lock(&self.last_flush).elapsed() >= self.flush_interval
    }

    /// Drain the buffer and persist the batch.
    ///
    /// On failure the whole batch returns to the head of the buffer in its
    /// original order and the error propagates; the caller decides how long
    /// to wait before retrying.
    pub async fn flush(&self, store: &Store) -> anyhow::Result<usize> {
        let batch: Vec<Sample> = {
            let mut samples = lock(&self.samples);
            samples.drain(..).collect()
        };
        if batch.is_empty() {
            *lock(&self.last_flush) = Instant::now();
            return Ok(0);
        }

        match store.flush_raw(batch.clone()).await {
            Ok(written) => {
                *lock(&self.last_flush) = Instant::now();
                tracing::debug!(written, "raw buffer flushed");
                Ok(written)
            }
            Err(e) => {
                let mut samples = lock(&self.samples);
                for sample in batch.into_iter().rev() {
                    samples.push_front(sample);
                }
                Err(e)
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Spawn the flusher task: a 1 s tick covers the time trigger while traffic
/// is idle, and doubles as the bounded retry delay after a failed flush.
/// Cancellation performs one final flush attempt.
pub fn spawn_flusher(app: Arc<AppState>) {
    tokio::spawn(async move {
        let shutdown = app.shutdown.clone();
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }
            if app.buffer.should_flush() {
                if let Err(e) = app.buffer.flush(&app.store).await {
                    tracing::warn!(err = %e, buffered = app.buffer.len(),
                        "raw buffer flush failed, batch re-queued");
                }
            }
        }

        if let Err(e) = app.buffer.flush(&app.store).await {
            tracing::warn!(err = %e, lost = app.buffer.len(),
                "final raw buffer flush failed");
        }
        tracing::debug!("raw buffer flusher stopped");
    });
}

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
