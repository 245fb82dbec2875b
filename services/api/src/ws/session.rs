//! Manages the lifecycle of one proxied realtime session.
//!
//! A session pairs an accepted client socket with a freshly opened upstream
//! socket. Each socket gets a writer task fed by a channel; the relay reads
//! from both and writes only through the channels. When either leg ends,
//! both writers are closed and awaited for a bounded time.

use super::{
    frame::Frame,
    relay::Relay,
    upstream::{self, CLIENT_REQUEST_ID},
};
use crate::state::AppState;
use axum::{
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    http::HeaderMap,
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use std::{fmt::Display, sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{Instrument, debug, error, info, instrument, warn};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Axum handler to upgrade an HTTP connection to a realtime session.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let request_id = headers
        .get(CLIENT_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    ws.on_upgrade(move |socket| handle_socket(socket, state, request_id))
}

#[instrument(name = "realtime_session", skip_all, fields(session_id))]
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, request_id: Option<String>) {
    let session_id = Uuid::new_v4();
    tracing::Span::current().record("session_id", tracing::field::display(session_id));
    info!(request_id = request_id.as_deref(), "New realtime session.");

    let upstream = match upstream::connect(&state.config.realtime, request_id.as_deref()).await {
        Ok(upstream) => upstream,
        Err(e) => {
            error!(error = ?e, "Upstream connection failed; closing client.");
            let close = Message::Close(Some(CloseFrame {
                code: close_code::ERROR,
                reason: "Upstream connection failed".into(),
            }));
            if let Err(e) = socket.send(close).await {
                debug!(error = %e, "Client was already gone");
            }
            return;
        }
    };

    let (client_sink, client_stream) = socket.split();
    let (upstream_sink, upstream_stream) = upstream.split();

    let (to_client, client_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (to_upstream, upstream_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let client_writer = tokio::spawn(
        write_frames(client_sink, client_rx, Frame::into_client).in_current_span(),
    );
    let upstream_writer = tokio::spawn(
        write_frames(upstream_sink, upstream_rx, Frame::into_upstream).in_current_span(),
    );

    let relay = Relay::new(
        state.rules.clone(),
        state.tools.clone(),
        state.config.tool_timeout,
    );
    let ended = relay
        .run(
            read_frames(client_stream, Frame::from_client),
            read_frames(upstream_stream, Frame::from_upstream),
            to_client.clone(),
            to_upstream.clone(),
        )
        .await;
    info!(ended_by = ?ended, "Session leg closed; tearing down.");

    // Queue a close behind any pending frames. If a channel is full the writer
    // still stops once the relay's senders are dropped.
    for (leg, sender) in [("client", to_client), ("upstream", to_upstream)] {
        if let Err(e) = sender.try_send(Frame::Close) {
            debug!(leg, error = %e, "Could not queue close frame");
        }
    }
    close_writer("client", client_writer).await;
    close_writer("upstream", upstream_writer).await;
    info!("Session finished.");
}

/// Adapts a socket's read half into a stream of relay frames. The stream ends
/// at the first transport error.
fn read_frames<S, M, E>(
    stream: S,
    decode: fn(M) -> Option<Frame>,
) -> impl Stream<Item = Frame> + Unpin + Send
where
    S: Stream<Item = Result<M, E>> + Unpin + Send,
    M: Send,
    E: Display,
{
    stream
        .scan((), move |_, message| {
            future::ready(match message {
                Ok(message) => Some(decode(message)),
                Err(e) => {
                    debug!(error = %e, "Socket read failed");
                    None
                }
            })
        })
        .filter_map(future::ready)
}

/// Writes frames to a socket until the channel closes or a close frame is sent.
async fn write_frames<S, M>(mut sink: S, mut rx: mpsc::Receiver<Frame>, encode: fn(Frame) -> M)
where
    S: Sink<M> + Unpin,
    S::Error: Display,
{
    while let Some(frame) = rx.recv().await {
        let closing = frame == Frame::Close;
        if let Err(e) = sink.send(encode(frame)).await {
            debug!(error = %e, "Socket write failed");
            return;
        }
        if closing {
            break;
        }
    }
    if let Err(e) = sink.close().await {
        debug!(error = %e, "Socket close failed");
    }
}

async fn close_writer(leg: &str, writer: JoinHandle<()>) {
    let abort = writer.abort_handle();
    match tokio::time::timeout(CLOSE_GRACE, writer).await {
        Ok(Ok(())) => debug!(leg, "Writer closed"),
        Ok(Err(e)) => warn!(leg, error = %e, "Writer task failed"),
        Err(_) => {
            warn!(leg, "Writer did not close in time; aborting");
            abort.abort();
        }
    }
}
