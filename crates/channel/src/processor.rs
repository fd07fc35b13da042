//! Frame processing loop for one scope's connection.
//!
//! Reads raw frames from the WebSocket, parses them into
//! [`ChannelEvent`]s, and fans them out through the scope's
//! [`ScopeHandlers`]. Malformed frames are logged and dropped, never
//! surfaced to handler code.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use tokio_tungstenite::tungstenite::Message;

use crate::dispatch::ScopeHandlers;
use crate::messages::{parse_event, EventKind};

/// Process frames until the connection closes, a receive error occurs,
/// or the cancellation token fires.
pub(crate) async fn process_frames(
    ws_stream: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    project_id: &str,
    handlers: &ScopeHandlers,
    cancel: &CancellationToken,
) {
    loop {
        let msg_result = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(project_id, "Frame processing cancelled");
                return;
            }
            msg = ws_stream.next() => match msg {
                Some(result) => result,
                None => return, // stream exhausted
            },
        };

        match msg_result {
            Ok(Message::Text(text)) => handle_text_frame(&text, project_id, handlers),
            Ok(Message::Binary(_)) => {
                tracing::trace!(project_id, "Ignoring binary frame");
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                // Handled automatically by tungstenite.
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(project_id, ?frame, "Channel WebSocket closed");
                return;
            }
            Ok(Message::Frame(_)) => {}
            Err(e) => {
                tracing::error!(project_id, error = %e, "WebSocket receive error");
                return;
            }
        }
    }
}

/// Parse one text frame and dispatch it to the scope's handlers.
fn handle_text_frame(text: &str, project_id: &str, handlers: &ScopeHandlers) {
    match parse_event(text) {
        Ok(event) => {
            if event.classify() == EventKind::SubscribeAck {
                tracing::debug!(project_id, "Subscription acknowledged");
            }
            handlers.dispatch(&event);
        }
        Err(e) => {
            tracing::warn!(
                project_id,
                error = %e,
                raw_message = %text,
                "Failed to parse channel message, dropping frame",
            );
        }
    }
}
