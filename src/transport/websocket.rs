//! WebSocket transport backed by tokio-tungstenite

use super::{Connection, Connector, TransportError, TransportEvent, NO_STATUS_RECEIVED};
use crate::error::redact_secrets;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

/// Opens plain or TLS WebSocket connections
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        let (stream, response) =
            connect_async(url)
                .await
                .map_err(|e| TransportError::OpenFailed {
                    url: redact_secrets(url),
                    reason: e.to_string(),
                })?;
        debug!(status = %response.status(), "WebSocket upgrade complete");
        Ok(Box::new(WebSocketConnection { stream }))
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| match e {
                WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
                other => TransportError::SendFailed(other.to_string()),
            })
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(TransportEvent::Frame(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => {
                    // Non-UTF-8 payloads still reach the codec, which discards them.
                    return Some(TransportEvent::Frame(
                        String::from_utf8_lossy(&bytes).into_owned(),
                    ));
                }
                Ok(Message::Close(frame)) => {
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_owned()),
                        None => (NO_STATUS_RECEIVED, String::new()),
                    };
                    return Some(TransportEvent::Closed { code, reason });
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {
                    trace!("Control frame received");
                    continue;
                }
                Err(WsError::ConnectionClosed) => return None,
                Err(e) => {
                    warn!("WebSocket read error: {}", e);
                    return Some(TransportEvent::Error(e.to_string()));
                }
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        match self.stream.close(Some(frame)).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::CloseFailed(e.to_string())),
        }
    }
}
