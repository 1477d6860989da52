//! Viewer connection handler
//!
//! One task per connection reads inbound frames; a writer task drains the
//! connection's subscriber queue into the socket. Broadcasts, pull replies
//! and error replies all travel through that queue, so a slow socket only
//! ever stalls its own queue.
//!
//! Whatever ends the connection (client close, socket error, the registry
//! pruning a dead queue, shutdown), the reader leaves through a single exit
//! path that deregisters exactly once.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::Subscription;
use crate::protocol::{self, ClientRequest, ServerMessage};
use crate::registry::Subscriber;
use crate::state::AppState;

/// Per-connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let mut conn = ConnectionState::Connecting;
    debug!(state = ?conn, "Viewer connecting");

    // Registration queues the current snapshot before anything else.
    let Subscription { subscriber, rx } = state.leaderboard.subscribe().await;
    let subscriber_id = subscriber.id();
    let closed = subscriber.closed();

    let (sink, mut stream) = socket.split();
    let send_timeout = state.leaderboard.config().send_timeout;
    let writer = tokio::spawn(write_loop(sink, rx, closed.clone(), send_timeout));

    conn = ConnectionState::Open;
    info!(subscriber_id = %subscriber_id, state = ?conn, "Viewer connected");

    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                handle_text(&state, &subscriber, text.as_str()).await;
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {} // ping/pong handled by axum, binary ignored
            Some(Err(e)) => {
                debug!(subscriber_id = %subscriber_id, error = %e, "Socket read failed");
                break;
            }
        }
    }

    conn = ConnectionState::Closing;
    debug!(subscriber_id = %subscriber_id, state = ?conn, "Viewer closing");

    state.leaderboard.unsubscribe(&subscriber_id).await;
    closed.cancel();
    if let Err(e) = writer.await {
        warn!(subscriber_id = %subscriber_id, error = %e, "Writer task ended abnormally");
    }

    conn = ConnectionState::Closed;
    info!(subscriber_id = %subscriber_id, state = ?conn, "Viewer disconnected");
}

/// Decode and act on one inbound text frame.
async fn handle_text(state: &AppState, subscriber: &Subscriber, text: &str) {
    let reply = match protocol::decode(text) {
        Ok(ClientRequest::SubmitScore(submission)) => {
            let entity_id = submission.entity_id.clone();
            match state.submit(submission).await {
                // Success is implicit: the forced refresh already broadcast.
                Ok(entry) => {
                    debug!(
                        subscriber_id = %subscriber.id(),
                        entity_id = %entry.entity_id,
                        score = entry.score,
                        "Score accepted"
                    );
                    None
                }
                Err(e) => {
                    debug!(subscriber_id = %subscriber.id(), entity_id = %entity_id, error = %e, "Score rejected");
                    Some(ServerMessage::error(e))
                }
            }
        }
        Ok(ClientRequest::GetLeaderboard) => {
            state.leaderboard.send_current(subscriber).await;
            None
        }
        Ok(ClientRequest::Unknown(action)) => {
            warn!(subscriber_id = %subscriber.id(), action = ?action, "Ignoring unknown action");
            None
        }
        Err(e) => {
            state.metrics.record_submission_rejected();
            debug!(subscriber_id = %subscriber.id(), error = %e, "Rejected inbound frame");
            Some(ServerMessage::error(e))
        }
    };

    let Some(reply) = reply else {
        return;
    };
    match reply.encode() {
        Ok(frame) => {
            if let Err(e) = subscriber
                .send(frame, state.leaderboard.config().send_timeout)
                .await
            {
                debug!(subscriber_id = %subscriber.id(), error = %e, "Reply dropped");
            }
        }
        Err(e) => warn!(error = %e, "Failed to encode reply"),
    }
}

/// Drain the subscriber queue into the socket until closed.
///
/// A socket write never outlives the `closed` token, and the closing
/// handshake is bounded by `send_timeout`, so a peer that stopped reading
/// cannot pin this task.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Arc<str>>,
    closed: CancellationToken,
    send_timeout: Duration,
) {
    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            frame = rx.recv() => frame,
        };
        let Some(frame) = frame else {
            break;
        };

        let written = tokio::select! {
            _ = closed.cancelled() => break,
            written = sink.send(Message::Text(frame.to_string().into())) => written,
        };
        if let Err(e) = written {
            debug!(error = %e, "Socket write failed");
            // Stops the reader as well.
            closed.cancel();
            break;
        }
    }

    let goodbye = async {
        sink.send(Message::Close(None)).await?;
        sink.close().await
    };
    match timeout(send_timeout, goodbye).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Close frame not sent"),
        Err(_) => debug!("Close handshake timed out"),
    }
}
