//! The session's view of a live connection to the relay.
//!
//! A [`Transport`] is a pair of channels pumped by a background task, so the
//! session never touches the socket directly and tests can substitute an
//! in-process [`Connector`].

use crate::error::{Error, ErrorKind};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::*;
use protocol::NORMAL_CLOSURE;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Close code reported when the peer's close frame carried no status.
const NO_STATUS_RECEIVED: u16 = 1005;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close(u16),
}

/// Channel ends of an open connection.
///
/// `incoming` ends without a `Close` frame when the connection drops.
/// Dropping `outgoing` closes the connection normally.
pub struct Transport {
    pub outgoing: UnboundedSender<Frame>,
    pub incoming: UnboundedReceiver<Frame>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Transport, Error>;
}

/// Connects over WebSocket with `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Transport, Error> {
        let (socket, response) = tokio_tungstenite::connect_async(url).await?;
        debug!("WebSocket handshake with {url} returned {}", response.status());

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming) = mpsc::unbounded_channel();
        tokio::spawn(pump(socket, outgoing_rx, incoming_tx));

        Ok(Transport { outgoing, incoming })
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn close_message(code: u16) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: String::new().into(),
    }))
}

/// Moves frames between the socket and the transport channels until either
/// side is done.
async fn pump(
    socket: Socket,
    mut outgoing: UnboundedReceiver<Frame>,
    incoming: UnboundedSender<Frame>,
) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = outgoing.recv() => match frame {
                Some(Frame::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        warn!("WebSocket send failed: {e}");
                        break;
                    }
                }
                Some(Frame::Close(code)) => {
                    let _ = sink.send(close_message(code)).await;
                    break;
                }
                None => {
                    let _ = sink.send(close_message(NORMAL_CLOSURE)).await;
                    break;
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if incoming.send(Frame::Text(text.as_str().to_owned())).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map_or(NO_STATUS_RECEIVED, |frame| u16::from(frame.code));
                    let _ = incoming.send(Frame::Close(code));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("WebSocket read failed: {e}");
                    break;
                }
                None => break,
            },
        }
    }
}

impl From<mpsc::error::SendError<Frame>> for Error {
    fn from(err: mpsc::error::SendError<Frame>) -> Self {
        Error::new(ErrorKind::Transport, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_message_carries_code() {
        match close_message(4000) {
            Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 4000),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let err = WebSocketConnector
            .connect(&format!("ws://{address}/ws"))
            .await
            .err()
            .expect("connect must fail");
        assert_eq!(err.error_kind, ErrorKind::Connect);
    }
}
