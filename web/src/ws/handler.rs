use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::*;
use relay::connection::ConnectionId;
use relay::Manager;
use service::AppState;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use tokio::time::timeout;

/// Why a connection left the Open state.
#[derive(Debug, PartialEq)]
enum CloseReason {
    /// Peer sent a close frame, with its code if any.
    PeerClosed(Option<u16>),
    /// Socket ended without a close frame.
    PeerGone,
    TransportError,
    SendTimeout,
    /// The dispatcher removed the connection because it fell behind.
    Dropped,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CloseReason::PeerClosed(Some(code)) => write!(f, "peer closed with code {code}"),
            CloseReason::PeerClosed(None) => write!(f, "peer closed"),
            CloseReason::PeerGone => write!(f, "peer went away"),
            CloseReason::TransportError => write!(f, "transport error"),
            CloseReason::SendTimeout => write!(f, "send timed out"),
            CloseReason::Dropped => write!(f, "dropped by dispatcher"),
        }
    }
}

/// Upgrades the request and runs the connection lifecycle on the socket.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

/// Open: register, then run the reader and writer until either finishes.
/// Closed: unregister once, whichever side ended the connection.
async fn handle_socket(socket: WebSocket, app_state: AppState) {
    let manager = app_state.relay_manager.clone();
    let send_timeout = app_state.config.send_timeout();

    let (connection_id, outbound) = manager.register_connection();
    let (sink, stream) = socket.split();

    let reason = tokio::select! {
        reason = write_outbound(sink, outbound, send_timeout, &connection_id) => reason,
        reason = read_control(stream, &manager, &connection_id) => reason,
    };

    debug!("Connection {} closed: {reason}", connection_id.as_str());
    manager.unregister_connection(&connection_id);
}

/// Drains the connection's outbound queue onto the socket. Each write is
/// bounded by `send_timeout` so one stuck peer only ever costs itself.
async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: Receiver<String>,
    send_timeout: Duration,
    connection_id: &ConnectionId,
) -> CloseReason {
    while let Some(frame) = outbound.recv().await {
        match timeout(send_timeout, sink.send(Message::Text(frame.into()))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Send to connection {} failed: {e}", connection_id.as_str());
                return CloseReason::TransportError;
            }
            Err(_) => {
                warn!(
                    "Send to connection {} timed out after {:?}",
                    connection_id.as_str(),
                    send_timeout
                );
                return CloseReason::SendTimeout;
            }
        }
    }

    // The queue only closes when the dispatcher dropped this connection
    let close = Message::Close(Some(CloseFrame {
        code: close_code::AGAIN,
        reason: Utf8Bytes::from_static("connection fell behind"),
    }));
    let _ = timeout(send_timeout, sink.send(close)).await;
    CloseReason::Dropped
}

/// Applies inbound control frames until the peer goes away. Malformed or
/// binary frames are logged and never close the connection.
async fn read_control(
    mut stream: SplitStream<WebSocket>,
    manager: &Manager,
    connection_id: &ConnectionId,
) -> CloseReason {
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => manager.handle_control_frame(connection_id, text.as_str()),
            Ok(Message::Binary(_)) => warn!(
                "Ignoring binary frame on connection {}",
                connection_id.as_str()
            ),
            Ok(Message::Close(frame)) => {
                return CloseReason::PeerClosed(frame.map(|frame| frame.code));
            }
            // Ping/pong are answered by the socket itself
            Ok(_) => {}
            Err(e) => {
                debug!("Read from connection {} failed: {e}", connection_id.as_str());
                return CloseReason::TransportError;
            }
        }
    }

    CloseReason::PeerGone
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reason_display() {
        assert_eq!(
            CloseReason::PeerClosed(Some(1000)).to_string(),
            "peer closed with code 1000"
        );
        assert_eq!(CloseReason::Dropped.to_string(), "dropped by dispatcher");
        assert_eq!(CloseReason::SendTimeout.to_string(), "send timed out");
    }
}
