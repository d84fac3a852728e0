use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{stream, Stream, StreamExt};
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio::sync::broadcast;

use crate::startup::AppState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Streams `info` / `invoices` / `payments` frames to the client.
///
/// The connection stays open up to the configured deadline; idle periods
/// are bridged with keep-alive comments instead of per-write timeouts.
pub async fn get_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.streamer.subscribe();

    let frames = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(frame) => {
                    let event = Event::default().event(frame.event).data(frame.data);
                    return Some((Ok(event), rx));
                }
                // Slow readers skip what they missed instead of blocking
                // the publisher
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    let deadline = tokio::time::sleep(state.sse_deadline);
    let frames = frames.take_until(deadline);

    Sse::new(frames).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}
