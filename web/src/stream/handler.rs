use crate::{AppState, Result};
use async_stream::stream;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use log::*;
use sse::{Broadcaster, ChannelTransport, ConnectionId, STREAM_BUFFER};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Removes the connection when axum drops the response stream, which is how
/// a client disconnect surfaces on the server.
struct ConnectionGuard {
    broadcaster: Broadcaster,
    connection_id: ConnectionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let broadcaster = self.broadcaster.clone();
        let connection_id = self.connection_id.clone();
        runtime.spawn(async move {
            broadcaster.unregister_connection(&connection_id).await;
        });
    }
}

/// SSE handler that establishes a long-lived connection for real-time updates.
/// The client receives `connected`, then heartbeats and broadcasts until either
/// side closes the stream. Answers 503 once shutdown has started.
pub(crate) async fn sse_handler(
    State(app_state): State<AppState>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let (tx, mut rx) = mpsc::channel(STREAM_BUFFER);

    let broadcaster = app_state.broadcaster.clone();
    let connection_id = broadcaster.register_connection(Arc::new(ChannelTransport::new(tx)))?;
    debug!("Establishing SSE connection {connection_id}");
    let terminated = broadcaster.streams_terminated();

    let guard = ConnectionGuard {
        broadcaster,
        connection_id,
    };

    // Events arrive from the channel; the sender is dropped when the
    // registry closes the transport, which ends this stream. Shutdown ends it
    // regardless, once queued frames are flushed.
    let stream = stream! {
        let guard = guard;
        tokio::pin!(terminated);

        loop {
            let next = tokio::select! {
                biased;
                event = rx.recv() => event,
                _ = &mut terminated => None,
            };
            let Some(event) = next else {
                break;
            };
            yield event;
        }

        debug!("SSE connection {} closed by server", guard.connection_id);
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
