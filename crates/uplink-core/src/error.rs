//! Client error types.

use thiserror::Error;
use uplink_transport::TransportError;

/// Errors surfaced by the subscription core.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server rejected the credential during the handshake.
    /// Never retried automatically.
    #[error("Credential rejected: {0}")]
    Auth(String),

    /// Transient transport failure. Retried with backoff up to the
    /// configured attempt limit before becoming fatal.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Reconnect attempts were exhausted or the instance is otherwise
    /// closed for good. Also delivered once per live subscription as
    /// [`TopicEvent::ConnectionLost`](crate::registry::TopicEvent).
    #[error("Connection lost: reconnect attempts exhausted")]
    ConnectionLost,

    /// The subscription handle was already unsubscribed. Safe to ignore.
    #[error("Subscription already unsubscribed")]
    AlreadyUnsubscribed,

    /// Topic failed local validation.
    #[error("Invalid topic: {0}")]
    InvalidTopic(&'static str),

    /// The driver task is gone (all client handles were dropped and the
    /// task exited, or the runtime shut down).
    #[error("Client task has shut down")]
    Terminated,
}
