// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process pub/sub hub fanning events out to SSE subscribers.
//!
//! Each channel key owns a bounded `tokio::sync::broadcast` channel, so a
//! publish never blocks: a subscriber that falls more than
//! [`CHANNEL_CAPACITY`] events behind drops the oldest and resumes from the
//! newest.  The registry lock guards only map mutation, never any await.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::events::{ChannelKey, StreamEvent};

/// Per-channel ring capacity before laggards start skipping.
pub const CHANNEL_CAPACITY: usize = 256;

pub struct Hub {
    channels: Mutex<HashMap<ChannelKey, broadcast::Sender<StreamEvent>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self { channels: Mutex::new(HashMap::new()) }
    }

    /// Register a subscriber for `key`, creating the channel on first use.
    ///
    /// Dropping the returned receiver unsubscribes; the sender itself is
    /// pruned on the next publish that finds no receivers left.
    pub fn subscribe(&self, key: ChannelKey) -> broadcast::Receiver<StreamEvent> {
        match self.channels.lock() {
            Ok(mut channels) => channels
                .entry(key)
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe(),
            // A poisoned registry still has to hand out a live receiver.
            Err(poisoned) => poisoned
                .into_inner()
                .entry(key)
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe(),
        }
    }

    /// Publish `event` to every current subscriber of `key`.
    ///
    /// Returns the number of receivers the event reached.  Publishing to a
    /// key nobody listens on is a no-op and prunes any stale channel entry.
    pub fn publish(&self, key: &ChannelKey, event: StreamEvent) -> usize {
        let mut channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(sender) = channels.get(key) else { return 0 };
        match sender.send(event) {
            Ok(delivered) => delivered,
            Err(_) => {
                channels.remove(key);
                0
            }
        }
    }

    /// Current subscriber count for `key`.
    pub fn subscriber_count(&self, key: &ChannelKey) -> usize {
        let channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        channels.get(key).map(|s| s.receiver_count()).unwrap_or(0)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
