// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSE surface: long-lived `text/event-stream` responses fed from the hub.
//!
//! Each response subscribes on open, emits a `connected` frame, then relays
//! hub events until the client goes away (the stream is dropped, which drops
//! the broadcast receiver and thereby unsubscribes) or the server shuts down
//! (the cancellation token ends the stream cooperatively).

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{self, StreamExt};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::api::auth::{ensure_cow_access, AuthFarmer};
use crate::error::ApiError;
use crate::events::{ChannelKey, StreamEvent, ML_TRAINING_CHANNEL};
use crate::state::AppState;

/// `GET /api/v1/stream/cows/{cow_id}`: live events for one animal.
pub async fn stream_cow(
    State(app): State<Arc<AppState>>,
    Path(cow_id): Path<Uuid>,
    farmer: AuthFarmer,
) -> Result<Response, ApiError> {
    ensure_cow_access(&app, cow_id, &farmer).await?;
    Ok(channel_response(&app, ChannelKey::Animal(cow_id)))
}

/// `GET /api/v1/stream/ml-status`: training-cycle progress.
pub async fn stream_ml_status(
    State(app): State<Arc<AppState>>,
    _farmer: AuthFarmer,
) -> Response {
    channel_response(&app, ChannelKey::System(ML_TRAINING_CHANNEL.to_owned()))
}

fn channel_response(app: &AppState, key: ChannelKey) -> Response {
    let receiver = app.hub.subscribe(key.clone());
    let connected = frame(&StreamEvent::Connected { channel: key.name() });

    let relay = BroadcastStream::new(receiver).filter_map(|item| async move {
        match item {
            Ok(event) => Some(frame(&event)),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "sse subscriber lagged, resuming from newest");
                None
            }
        }
    });

    let stream = stream::once(async move { connected })
        .chain(relay)
        .take_until(app.shutdown.clone().cancelled_owned());

    (
        [
            ("cache-control", "no-cache"),
            ("connection", "keep-alive"),
            ("x-accel-buffering", "no"),
        ],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

fn frame(event: &StreamEvent) -> Result<Event, Infallible> {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_owned());
    Ok(Event::default().data(data))
}
