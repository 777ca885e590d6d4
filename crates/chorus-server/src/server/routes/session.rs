//! Drives one WebSocket through the relay lifecycle.
//!
//! ```text
//!            ┌──────────── reader task ◄──── socket stream
//!  socket ───┤                 │ Ping → control channel
//!            └──────────── writer task ◄──── outbound queue (ChannelHandle)
//!                              └─ stop token → Close frame
//! ```
//!
//! Whichever task ends first ends the session; the other is aborted and
//! the relay is told exactly once.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use chorus_relay::{
    undeliverable_notice, BrokerReply, ChannelHandle, CloseReason, OutboundFrame, RelayError,
    RouteOutcome, Session,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::server::AppState;

/// Control frames the reader asks the writer to send.
const CONTROL_BUFFER: usize = 8;

/// Which protocol the socket speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Endpoint {
    /// `{to, message}` envelopes and plain text
    Text,
    /// Subscribe/unsubscribe/publish frames
    Broker,
}

/// Run a socket session to completion.
pub(super) async fn run(socket: WebSocket, state: Arc<AppState>, endpoint: Endpoint) {
    let (handle, outbound) = ChannelHandle::channel(state.config.outbound_buffer);
    let session = state.relay.connect(Arc::new(handle));
    info!(identity = %session.identity(), ?endpoint, "WebSocket session established");

    let (sink, stream) = socket.split();
    let (control_tx, control_rx) = mpsc::channel(CONTROL_BUFFER);

    let mut writer = tokio::spawn(write_loop(
        sink,
        outbound,
        control_rx,
        state.stop_token.clone(),
    ));
    let mut reader = tokio::spawn(read_loop(
        stream,
        Arc::clone(&state),
        Arc::clone(&session),
        control_tx,
        endpoint,
    ));

    let reason = tokio::select! {
        result = &mut writer => {
            reader.abort();
            close_reason(result)
        }
        result = &mut reader => {
            writer.abort();
            close_reason(result)
        }
    };

    state.relay.disconnect(&session, reason.clone());
    info!(identity = %session.identity(), reason = %reason, "WebSocket session closed");
}

fn close_reason(result: Result<CloseReason, tokio::task::JoinError>) -> CloseReason {
    result.unwrap_or_else(|e| CloseReason::Error(e.to_string()))
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    mut control: mpsc::Receiver<Message>,
    stop_token: CancellationToken,
) -> CloseReason {
    loop {
        let message = tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => Message::Text(frame.as_str().to_owned()),
                None => return CloseReason::Normal,
            },
            Some(message) = control.recv() => message,
            _ = stop_token.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return CloseReason::Shutdown;
            }
        };

        if let Err(e) = sink.send(message).await {
            error!(error = %e, "Failed to send WebSocket message");
            return CloseReason::Error(e.to_string());
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    state: Arc<AppState>,
    session: Arc<Session>,
    control: mpsc::Sender<Message>,
    endpoint: Endpoint,
) -> CloseReason {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                debug!(len = text.len(), "Received WebSocket message");
                handle_text(&state, &session, endpoint, &text);
            }
            Ok(Message::Binary(_)) => {
                warn!("Received binary WebSocket message (not supported)");
            }
            Ok(Message::Ping(data)) => {
                if control.send(Message::Pong(data)).await.is_err() {
                    return CloseReason::Error("writer stopped".to_string());
                }
            }
            Ok(Message::Pong(_)) => {
                // Ignore pongs
            }
            Ok(Message::Close(_)) => {
                debug!("WebSocket close requested");
                return CloseReason::Normal;
            }
            Err(e) => {
                warn!(error = %e, "WebSocket error");
                return CloseReason::Error(e.to_string());
            }
        }
    }
    CloseReason::Normal
}

fn handle_text(state: &AppState, session: &Session, endpoint: Endpoint, text: &str) {
    let result = match endpoint {
        Endpoint::Text => state.relay.dispatch(session, text),
        Endpoint::Broker => match state.relay.dispatch_broker(session, text) {
            Ok(BrokerReply::Routed(outcome)) => Ok(outcome),
            Ok(reply) => {
                debug!(identity = %session.identity(), ?reply, "Subscription updated");
                return;
            }
            Err(e) => Err(e),
        },
    };
    report(state, session, result);
}

/// Tell the sender about outcomes it should know about.
///
/// A unicast that reached nobody, whether the target is unknown or its queue
/// refused the frame, earns a `SYSTEM` notice unless disabled by config.
fn report(state: &AppState, session: &Session, result: Result<RouteOutcome, RelayError>) {
    let identity = session.identity();
    if let Some(notice) = undeliverable_notice(&result) {
        if state.config.notify_undeliverable {
            state.relay.notify(identity, notice);
        }
        return;
    }
    match result {
        Ok(_) => {}
        Err(RelayError::SessionClosed(_)) => {
            debug!(identity = %identity, "Dropped frame from closed session");
        }
        Err(e) if e.is_client_error() => {
            debug!(identity = %identity, error = %e, "Rejected inbound frame");
            state.relay.notify(identity, e.to_string());
        }
        Err(e) => {
            error!(identity = %identity, error = %e, "Failed to route inbound frame");
        }
    }
}
