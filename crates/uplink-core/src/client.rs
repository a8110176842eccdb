//! Public client handle.
//!
//! A [`Client`] is a cheap, cloneable handle onto the driver task that
//! owns the actual connection. All methods are safe to call from any
//! task; they serialize onto the driver through a command channel.

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::ClientConfig;
use crate::connection::{Command, ConnectionState, Driver};
use crate::error::ClientError;
use crate::queue::OutboundCommand;
use crate::registry::{SubscriptionHandle, TopicEvent};
use crate::token::TokenProvider;
use uplink_transport::Connector;

/// Handle to a subscription core instance.
///
/// Each instance owns at most one live transport connection. Multiple
/// independent instances can coexist; nothing here is process-global.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use uplink_core::{Client, ClientConfig, StaticToken, TopicEvent};
/// use uplink_transport::WebSocketConnector;
///
/// # async fn run() -> Result<(), uplink_core::ClientError> {
/// let client = Client::new(
///     ClientConfig::with_endpoint("wss://realtime.example.com/ws"),
///     Arc::new(WebSocketConnector::new()),
///     Arc::new(StaticToken::new("bearer-token")),
/// );
/// client.connect().await?;
///
/// let mut updates = client.subscribe("event:42:update").await?;
/// while let Some(event) = updates.recv().await {
///     match event {
///         TopicEvent::Message(msg) => println!("{} bytes", msg.payload.len()),
///         TopicEvent::ConnectionLost => break,
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl Client {
    /// Create a client and spawn its driver task.
    ///
    /// Must be called from within a Tokio runtime. No connection is made
    /// until [`connect`](Self::connect); subscriptions and emits issued
    /// before that are queued and replayed once connected.
    #[must_use]
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let driver = Driver::new(config, connector, tokens, cmd_rx, state_tx);
        tokio::spawn(driver.run());

        Self { cmd_tx, state_rx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(tx))
            .map_err(|_| ClientError::Terminated)?;
        rx.await.map_err(|_| ClientError::Terminated)
    }

    /// Establish the connection, retrying transient failures with
    /// backoff.
    ///
    /// Calling this while already connecting or connected is a no-op.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Auth`] if the server rejects the credential
    ///   (not retried)
    /// - [`ClientError::Transport`] once retry attempts are exhausted,
    ///   or if a concurrent `disconnect()` cancelled the attempt
    /// - [`ClientError::ConnectionLost`] if the instance is already
    ///   closed for good
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.request(|reply| Command::Connect { reply }).await?
    }

    /// Tear down the connection and cancel any pending reconnect.
    /// Idempotent; a later [`connect`](Self::connect) starts fresh.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Terminated`] if the driver task is gone.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Register interest in a topic.
    ///
    /// The transport-level subscription is issued only on the 0 -> 1
    /// reference count transition, and is queued for replay if the
    /// connection is currently down.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidTopic`] for malformed topics or
    /// [`ClientError::ConnectionLost`] on a closed instance.
    pub async fn subscribe(&self, topic: impl Into<String>) -> Result<Subscription, ClientError> {
        let topic = topic.into();
        let (handle, rx) = self
            .request(|reply| Command::Subscribe { topic, reply })
            .await??;
        Ok(Subscription { handle, rx })
    }

    /// Release a subscription.
    ///
    /// The transport-level unsubscribe is issued only when the topic's
    /// reference count reaches zero.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AlreadyUnsubscribed`] if the handle was
    /// already released; safe to ignore.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), ClientError> {
        let handle = handle.clone();
        self.request(|reply| Command::Unsubscribe { handle, reply })
            .await?
    }

    /// Publish a payload to a topic. Queued while disconnected and
    /// flushed in order on reconnect.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidTopic`] for malformed topics or
    /// [`ClientError::ConnectionLost`] on a closed instance.
    pub async fn emit(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<(), ClientError> {
        let topic = topic.into();
        let payload = payload.into();
        self.request(|reply| Command::Emit {
            topic,
            payload,
            reply,
        })
        .await?
    }

    /// Take the commands still queued after the instance closed, so the
    /// caller can discard or persist them. Empty unless the connection
    /// was lost with work pending.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Terminated`] if the driver task is gone.
    pub async fn take_pending(&self) -> Result<Vec<OutboundCommand>, ClientError> {
        self.request(|reply| Command::TakePending { reply }).await
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch connection state transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

/// A live subscription: a handle for releasing it plus the stream of
/// [`TopicEvent`]s for its topic.
///
/// Dropping a subscription without unsubscribing is tolerated - the
/// registry prunes it on the next delivery - but explicit
/// [`Client::unsubscribe`] releases the topic promptly.
pub struct Subscription {
    handle: SubscriptionHandle,
    rx: mpsc::Receiver<TopicEvent>,
}

impl Subscription {
    /// The handle to pass to [`Client::unsubscribe`].
    #[must_use]
    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    /// The subscribed topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        self.handle.topic()
    }

    /// Receive the next event. Returns `None` once the subscription is
    /// released and all buffered events are drained.
    pub async fn recv(&mut self) -> Option<TopicEvent> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    ///
    /// # Errors
    ///
    /// Returns an error if no event is buffered or the subscription is
    /// released.
    pub fn try_recv(&mut self) -> Result<TopicEvent, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }
}
