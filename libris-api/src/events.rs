use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::{Stream, StreamExt};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::warn;

use crate::state::AppState;

/// Server-sent `slot_update` / `inventory_update` notifications. The stream
/// ends when the server starts shutting down.
pub async fn stream(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let shutdown = state.shutdown.clone();

    let stream = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => match Event::default().event(event.name()).json_data(&event) {
                Ok(sse) => Some(Ok(sse)),
                Err(e) => {
                    warn!("Dropping unserialisable event: {}", e);
                    None
                }
            },
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!("SSE client lagged, {} events skipped", skipped);
                None
            }
        }
    })
    .take_until(async move { shutdown.wait().await });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
