//! SSE event streaming endpoint.
//!
//! The handler replays existing events, capturing the last stream id, then
//! subscribes from exactly that id, so events emitted between replay and
//! subscribe are neither lost nor duplicated. The stream closes after a
//! terminal event; a disconnected client is observed when a send fails,
//! at the latest one block window later.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::warn;

use hadron::event::PipelineEvent;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub cr_id: String,
}

fn sse_event(event: &PipelineEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(event.event_type.as_str()).data(data)
}

async fn pump(state: Arc<AppState>, cr_id: String, tx: mpsc::Sender<Event>) {
    let (events, last_id) = match state.bus.replay(&cr_id, "0").await {
        Ok(replayed) => replayed,
        Err(e) => {
            warn!(cr_id = %cr_id, error = %e, "event replay failed");
            return;
        }
    };
    for event in &events {
        if tx.send(sse_event(event)).await.is_err() {
            return;
        }
        if event.event_type.is_terminal() {
            return;
        }
    }

    let mut subscription = match state.bus.subscribe(&cr_id, &last_id) {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(cr_id = %cr_id, error = %e, "event subscribe failed");
            return;
        }
    };
    loop {
        let batch = match subscription.next_batch().await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(cr_id = %cr_id, error = %e, "event subscription failed");
                return;
            }
        };
        // An empty batch means the block window elapsed; the send side
        // below notices a gone client on the next delivery.
        for event in &batch {
            if tx.send(sse_event(event)).await.is_err() {
                return;
            }
            if event.event_type.is_terminal() {
                return;
            }
        }
        if tx.is_closed() {
            return;
        }
    }
}

/// Server-sent events for one CR: full history first, then live.
pub async fn event_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(pump(state, query.cr_id, tx));
    Sse::new(ReceiverStream::new(rx).map(Ok::<Event, Infallible>))
        .keep_alive(KeepAlive::default())
}
