//! Transport abstraction traits.
//!
//! The subscription core is transport-agnostic: it drives a
//! [`Connection`] produced by a [`Connector`] and never touches the
//! underlying socket. Connections are owned exclusively by one task, so
//! the trait takes `&mut self` and needs no internal locking.

use async_trait::async_trait;
use thiserror::Error;
use uplink_protocol::Frame;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connect attempt or request timed out.
    #[error("Transport timed out")]
    Timeout,

    /// The endpoint URL could not be used by this connector.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Failed to send a frame.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive a frame.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] uplink_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Dials an endpoint and produces an established connection.
///
/// A connector is reused across reconnect attempts; each call yields a
/// fresh connection with no memory of prior sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a new connection to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is unusable or the dial fails.
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Connection>, TransportError>;

    /// Transport name (e.g. "websocket", "polling").
    fn name(&self) -> &'static str;

    /// Whether this connector is currently worth trying.
    fn is_available(&self) -> bool {
        true
    }
}

/// An established duplex frame stream.
#[async_trait]
pub trait Connection: Send {
    /// Receive the next frame.
    ///
    /// Returns `None` if the connection closed cleanly.
    ///
    /// # Errors
    ///
    /// Returns an error on receive failure. A `Protocol` error means one
    /// frame was malformed; the stream itself stays aligned and usable.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;

    /// Send a frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be delivered.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Close the connection gracefully. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Whether the connection is still open.
    fn is_open(&self) -> bool;

    /// Name of the transport carrying this connection.
    fn transport(&self) -> &'static str {
        "unknown"
    }
}
