//! # Duplex Channel Transport
//!
//! The connection manager never touches sockets. It asks a [`Connector`] for
//! a [`Channel`]: a sender of outgoing text frames and a receiver of incoming
//! ones. When the far side goes away, `incoming` yields `None`.
//!
//! ```text
//! ┌──────────────────────┐  connect()   ┌────────────────────────────────┐
//! │ ConnectionManager    │ ───────────► │ WsConnector                    │
//! │                      │              │  handshake (Bearer, timeout)   │
//! │  outgoing ──────────────────────────►  pump task ──► WebSocket sink  │
//! │  incoming ◄──────────────────────────  pump task ◄── WebSocket stream│
//! └──────────────────────┘              └────────────────────────────────┘
//!
//! Pump task exits (and drops `incoming`) on:
//!   • Close frame or stream error from the server
//!   • the manager dropping `outgoing`  (sends a Close frame first)
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

/// Incoming frames buffered before the pump waits on the manager.
const INCOMING_BUFFER: usize = 256;

// =============================================================================
// Channel + Connector
// =============================================================================

/// One open duplex channel.
#[derive(Debug)]
pub struct Channel {
    /// Text frames to send. Dropping it closes the channel.
    pub outgoing: mpsc::UnboundedSender<String>,

    /// Text frames received. `None` means the channel closed.
    pub incoming: mpsc::Receiver<String>,
}

impl Channel {
    /// Creates a connected pair: the [`Channel`] handed to the manager and the
    /// far end `(receiver of what the manager sends, sender of what it receives)`.
    ///
    /// In-process connectors use this in place of a socket.
    pub fn pair() -> (Channel, mpsc::UnboundedReceiver<String>, mpsc::Sender<String>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::channel(INCOMING_BUFFER);
        (
            Channel {
                outgoing: out_tx,
                incoming: in_rx,
            },
            out_rx,
            in_tx,
        )
    }
}

/// Opens duplex channels.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> SyncResult<Channel>;
}

// =============================================================================
// WebSocket Connector
// =============================================================================

/// Production connector on `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    token: Option<String>,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, token: Option<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            token,
            connect_timeout,
        }
    }

    async fn open(&self) -> SyncResult<WebSocketStream<MaybeTlsStream<TcpStream>>> {
        let mut request = self.url.as_str().into_client_request()?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| SyncError::InvalidConfig(format!("Invalid bearer token: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        match timeout(self.connect_timeout, connect_async(request)).await {
            Ok(Ok((ws_stream, response))) => {
                debug!(status = ?response.status(), "WebSocket handshake complete");
                Ok(ws_stream)
            }
            Ok(Err(e)) => Err(SyncError::from(e)),
            Err(_) => Err(SyncError::Timeout(self.connect_timeout.as_millis() as u64)),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> SyncResult<Channel> {
        let ws_stream = self.open().await?;
        info!(url = %self.url, "WebSocket connected");

        let (channel, outgoing_rx, incoming_tx) = Channel::pair();
        tokio::spawn(pump(ws_stream, outgoing_rx, incoming_tx));
        Ok(channel)
    }
}

/// Moves frames between the socket and the channel until either side stops.
async fn pump(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outgoing_rx: mpsc::UnboundedReceiver<String>,
    incoming_tx: mpsc::Sender<String>,
) {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            outgoing = outgoing_rx.recv() => match outgoing {
                Some(text) => {
                    if let Err(e) = write.send(WsMessage::Text(text.into())).await {
                        warn!(?e, "WebSocket send failed");
                        break;
                    }
                }
                None => {
                    debug!("Channel released, closing WebSocket");
                    let _ = write.send(WsMessage::Close(None)).await;
                    break;
                }
            },

            incoming = read.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    if incoming_tx.send(text.as_str().to_owned()).await.is_err() {
                        debug!("Incoming receiver dropped");
                        break;
                    }
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    if let Err(e) = write.send(WsMessage::Pong(data)).await {
                        warn!(?e, "WebSocket pong failed");
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    info!(?frame, "Received close frame");
                    break;
                }
                Some(Ok(WsMessage::Binary(_))) => {
                    warn!("Received unexpected binary message");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(?e, "WebSocket error");
                    break;
                }
                None => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_pair_is_wired() {
        let (mut channel, mut far_rx, far_tx) = Channel::pair();

        channel.outgoing.send("hello".into()).unwrap();
        assert_eq!(far_rx.recv().await.as_deref(), Some("hello"));

        far_tx.send("world".into()).await.unwrap();
        assert_eq!(channel.incoming.recv().await.as_deref(), Some("world"));

        drop(far_tx);
        assert_eq!(channel.incoming.recv().await, None);
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        // Nothing listens on port 9 locally
        let connector = WsConnector::new("ws://127.0.0.1:9/ws", None, Duration::from_secs(2));
        let err = connector.connect().await.unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err:?}");
    }
}
