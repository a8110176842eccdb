//! WebSocket connector built on tokio-tungstenite.

use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};
use uplink_protocol::{codec, Frame};

use crate::traits::{Connection, Connector, TransportError};

/// WebSocket connector configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024, // 64 KB
        }
    }
}

/// WebSocket connector.
#[derive(Debug, Default)]
pub struct WebSocketConnector {
    config: WebSocketConfig,
}

impl WebSocketConnector {
    /// Create a connector with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connector with custom configuration.
    #[must_use]
    pub fn with_config(config: WebSocketConfig) -> Self {
        Self { config }
    }
}

/// Normalize an endpoint URL to a ws:// or wss:// scheme.
fn websocket_url(endpoint: &str) -> Result<String, TransportError> {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        Ok(endpoint.to_string())
    } else if let Some(rest) = endpoint.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else if let Some(rest) = endpoint.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else {
        Err(TransportError::InvalidEndpoint(endpoint.to_string()))
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Connection>, TransportError> {
        let url = websocket_url(endpoint)?;
        debug!(url = %url, "Dialing WebSocket endpoint");

        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Other(format!("WebSocket handshake failed: {e}")))?;

        debug!(url = %url, "WebSocket handshake completed");

        Ok(Box::new(WebSocketConnection::new(
            stream,
            self.config.max_message_size,
        )))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// An established client-side WebSocket connection.
pub struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    read_buffer: BytesMut,
    max_message_size: usize,
    open: bool,
}

impl WebSocketConnection {
    fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>, max_message_size: usize) -> Self {
        Self {
            stream,
            read_buffer: BytesMut::with_capacity(4096),
            max_message_size,
            open: true,
        }
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        // A prior message may have carried more than one frame.
        if let Some(frame) = codec::decode_from(&mut self.read_buffer)? {
            return Ok(Some(frame));
        }

        if !self.open {
            return Ok(None);
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    if data.len() > self.max_message_size {
                        warn!(
                            size = data.len(),
                            max = self.max_message_size,
                            "Oversized WebSocket message"
                        );
                        return Err(TransportError::Protocol(
                            uplink_protocol::ProtocolError::FrameTooLarge(data.len()),
                        ));
                    }

                    self.read_buffer.extend_from_slice(&data);
                    if let Some(frame) = codec::decode_from(&mut self.read_buffer)? {
                        return Ok(Some(frame));
                    }
                    // Partial frame, keep reading.
                }
                Some(Ok(Message::Text(text))) => {
                    // Servers should send binary; tolerate text for compatibility.
                    self.read_buffer.extend_from_slice(text.as_bytes());
                    if let Some(frame) = codec::decode_from(&mut self.read_buffer)? {
                        return Ok(Some(frame));
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        warn!(error = %e, "Failed to send pong");
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    // Transport-level pong, nothing to do.
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    self.open = false;
                    return Ok(None);
                }
                Some(Ok(Message::Frame(_))) => {
                    // Raw frame, ignore.
                }
                Some(Err(WsError::ConnectionClosed)) => {
                    self.open = false;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    self.open = false;
                    return Ok(None);
                }
            }
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::ConnectionClosed);
        }

        let data = codec::encode(&frame)?;
        self.stream
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        self.stream
            .close(None)
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {e}")))
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn transport(&self) -> &'static str {
        "websocket"
    }
}
