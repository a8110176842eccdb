//! Connection manager.
//!
//! One driver task exclusively owns the transport connection, the topic
//! router, and the outbound queue. Public [`Client`](crate::client::Client)
//! handles talk to it over a command channel, so registry mutation and
//! dispatch are serialized and never race.
//!
//! The retry state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!                     ^             |
//!                     |         (link drop)
//!                     |             v
//!                     +------ Reconnecting --(attempts exhausted)--> Closed
//! ```
//!
//! Every transition into `Connected` replays the outbound queue and
//! re-issues the currently-active subscriptions: the server keeps no
//! state across sessions. `Closed` is terminal; reaching it delivers
//! exactly one `ConnectionLost` event to each live subscription.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use uplink_protocol::{codes, Frame, Version, PROTOCOL_VERSION};
use uplink_transport::{Connection, Connector, TransportError};

use crate::backoff;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::queue::{flush_action, FlushAction, OutboundCommand, OutboundQueue};
use crate::registry::{validate_topic, Inbound, SubscriptionHandle, Topic, TopicEvent};
use crate::router::TopicRouter;
use crate::token::TokenProvider;

/// Observable connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none wanted.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// The link is up and subscriptions are live.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// Terminal: retries exhausted or credential rejected.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

pub(crate) type SubscribeReply =
    Result<(SubscriptionHandle, mpsc::Receiver<TopicEvent>), ClientError>;

/// Requests from client handles to the driver task.
pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Subscribe {
        topic: String,
        reply: oneshot::Sender<SubscribeReply>,
    },
    Unsubscribe {
        handle: SubscriptionHandle,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    Emit {
        topic: String,
        payload: Bytes,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    TakePending {
        reply: oneshot::Sender<Vec<OutboundCommand>>,
    },
}

/// Why a connect-retry-connected session ended.
enum SessionEnd {
    /// `disconnect()` was called.
    Stopped,
    /// Every client handle is gone.
    Shutdown,
    /// Retries exhausted or credential rejected; the instance is closed.
    Fatal,
}

/// Why an established link ended.
enum LinkEnd {
    Dropped,
    Stopped,
    Shutdown,
}

/// One connect attempt: transport dial plus handshake.
enum AttemptOutcome {
    Established(Session),
    Rejected(String),
    Failed(TransportError),
    Cancelled(SessionEnd),
}

enum HandshakeError {
    Auth(String),
    Transport(TransportError),
}

impl From<TransportError> for HandshakeError {
    fn from(err: TransportError) -> Self {
        HandshakeError::Transport(err)
    }
}

struct Session {
    conn: Box<dyn Connection>,
    heartbeat: Duration,
}

/// A reply computed during command application but sent only after any
/// pending transport work, so callers observe their command on the wire
/// once the await returns.
enum Deferred {
    Subscribe {
        reply: oneshot::Sender<SubscribeReply>,
        result: SubscribeReply,
    },
    Unit {
        reply: oneshot::Sender<Result<(), ClientError>>,
        result: Result<(), ClientError>,
    },
    Done,
}

impl Deferred {
    fn send(self) {
        match self {
            Deferred::Subscribe { reply, result } => {
                let _ = reply.send(result);
            }
            Deferred::Unit { reply, result } => {
                let _ = reply.send(result);
            }
            Deferred::Done => {}
        }
    }
}

/// The driver task: sole owner of the transport, router, and queue.
pub(crate) struct Driver {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenProvider>,
    router: TopicRouter,
    queue: OutboundQueue,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    next_request_id: u64,
    closed: bool,
}

impl Driver {
    pub(crate) fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenProvider>,
        cmd_rx: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        let buffer = config.delivery.subscription_buffer;
        Self {
            config,
            connector,
            tokens,
            router: TopicRouter::new(buffer),
            queue: OutboundQueue::new(),
            cmd_rx,
            state_tx,
            next_request_id: 1,
            closed: false,
        }
    }

    /// Main loop. Exits when every client handle is gone.
    pub(crate) async fn run(mut self) {
        while let Some(command) = self.cmd_rx.recv().await {
            match command {
                Command::Connect { reply } => {
                    if self.closed {
                        let _ = reply.send(Err(ClientError::ConnectionLost));
                        continue;
                    }
                    match self.run_session(reply).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Stopped => self.set_state(ConnectionState::Disconnected),
                        SessionEnd::Fatal => self.closed = true,
                    }
                }
                other => self.apply_command(other).send(),
            }
        }
        debug!("Driver task exiting");
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    /// Apply a command to the local registry and queue. No transport
    /// I/O happens here; callers flush afterwards if a link is up.
    fn apply_command(&mut self, command: Command) -> Deferred {
        match command {
            Command::Connect { reply } => {
                // Only reachable while a session is already running:
                // connect is idempotent then.
                Deferred::Unit {
                    reply,
                    result: Ok(()),
                }
            }
            Command::Disconnect { reply } => {
                let _ = reply.send(());
                Deferred::Done
            }
            Command::Subscribe { topic, reply } => {
                if self.closed {
                    return Deferred::Subscribe {
                        reply,
                        result: Err(ClientError::ConnectionLost),
                    };
                }
                match self.router.subscribe(&topic) {
                    Ok((handle, rx, outcome)) => {
                        if outcome == crate::registry::SubscribeOutcome::First {
                            self.queue.push(OutboundCommand::Subscribe(topic));
                        }
                        Deferred::Subscribe {
                            reply,
                            result: Ok((handle, rx)),
                        }
                    }
                    Err(e) => Deferred::Subscribe {
                        reply,
                        result: Err(e),
                    },
                }
            }
            Command::Unsubscribe { handle, reply } => {
                let result = match self.router.unsubscribe(&handle) {
                    Ok(crate::registry::UnsubscribeOutcome::Released(topic)) => {
                        if !self.closed {
                            self.queue.push(OutboundCommand::Unsubscribe(topic));
                        }
                        Ok(())
                    }
                    Ok(crate::registry::UnsubscribeOutcome::Retained) => Ok(()),
                    Err(e) => Err(e),
                };
                Deferred::Unit { reply, result }
            }
            Command::Emit {
                topic,
                payload,
                reply,
            } => {
                let result = if self.closed {
                    Err(ClientError::ConnectionLost)
                } else if let Err(e) = validate_topic(&topic) {
                    Err(ClientError::InvalidTopic(e))
                } else {
                    self.queue.push(OutboundCommand::Emit { topic, payload });
                    Ok(())
                };
                Deferred::Unit { reply, result }
            }
            Command::TakePending { reply } => {
                let _ = reply.send(self.queue.take_all());
                Deferred::Done
            }
        }
    }

    /// Drive one session: connect with retries, stay connected, repeat
    /// on link drops until stopped, shut down, or fatally out of retries.
    async fn run_session(
        &mut self,
        reply: oneshot::Sender<Result<(), ClientError>>,
    ) -> SessionEnd {
        let mut initial_reply = Some(reply);
        let mut attempt: u32 = 0;

        loop {
            self.set_state(ConnectionState::Connecting);

            match self.attempt().await {
                AttemptOutcome::Established(session) => {
                    attempt = 0;
                    match self.drive_link(session, &mut initial_reply).await {
                        LinkEnd::Stopped => return SessionEnd::Stopped,
                        LinkEnd::Shutdown => return SessionEnd::Shutdown,
                        LinkEnd::Dropped => continue,
                    }
                }
                AttemptOutcome::Cancelled(end) => {
                    if let Some(r) = initial_reply.take() {
                        let _ = r.send(Err(ClientError::Transport(
                            TransportError::ConnectionClosed,
                        )));
                    }
                    return end;
                }
                AttemptOutcome::Rejected(message) => {
                    warn!(reason = %message, "Credential rejected, not retrying");
                    return self.fail_session(initial_reply.take(), ClientError::Auth(message));
                }
                AttemptOutcome::Failed(err) => {
                    if attempt >= self.config.retry.max_retries {
                        warn!(attempts = attempt + 1, error = %err, "Reconnect attempts exhausted");
                        return self
                            .fail_session(initial_reply.take(), ClientError::Transport(err));
                    }

                    let delay = backoff::delay_for_attempt(
                        attempt,
                        self.config.retry.base_backoff(),
                        self.config.retry.max_backoff(),
                    );
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Connect failed, backing off"
                    );
                    self.set_state(ConnectionState::Reconnecting);

                    if let Some(end) = self.wait_backoff(delay).await {
                        if let Some(r) = initial_reply.take() {
                            let _ = r.send(Err(ClientError::Transport(
                                TransportError::ConnectionClosed,
                            )));
                        }
                        return end;
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Terminal failure: close the instance, notify every live consumer
    /// once, and answer the initial `connect()` caller if still waiting.
    fn fail_session(
        &mut self,
        initial_reply: Option<oneshot::Sender<Result<(), ClientError>>>,
        error: ClientError,
    ) -> SessionEnd {
        self.set_state(ConnectionState::Closed);
        let notified = self.router.connection_lost();
        info!(
            consumers = notified,
            pending = self.queue.len(),
            "Connection closed for good"
        );
        if let Some(r) = initial_reply {
            let _ = r.send(Err(error));
        }
        SessionEnd::Fatal
    }

    /// One connect attempt, serving commands while it is in flight so a
    /// `disconnect()` can cancel it.
    async fn attempt(&mut self) -> AttemptOutcome {
        let connector = Arc::clone(&self.connector);
        let endpoint = self.config.endpoint_url.clone();
        // Re-read the credential every attempt: tokens rotate.
        let token = self.tokens.token();
        let timeout = self.config.retry.connect_timeout();

        let dial = establish(connector, endpoint, token, timeout);
        tokio::pin!(dial);

        loop {
            tokio::select! {
                biased;
                command = self.cmd_rx.recv() => match command {
                    None => return AttemptOutcome::Cancelled(SessionEnd::Shutdown),
                    Some(Command::Disconnect { reply }) => {
                        // Cancels the in-flight connect attempt.
                        self.set_state(ConnectionState::Disconnected);
                        let _ = reply.send(());
                        return AttemptOutcome::Cancelled(SessionEnd::Stopped);
                    }
                    Some(other) => self.apply_command(other).send(),
                },
                result = &mut dial => return match result {
                    Ok(session) => AttemptOutcome::Established(session),
                    Err(HandshakeError::Auth(message)) => AttemptOutcome::Rejected(message),
                    Err(HandshakeError::Transport(err)) => AttemptOutcome::Failed(err),
                },
            }
        }
    }

    /// Sleep out a backoff delay, still serving commands. Returns how to
    /// end the session if it was interrupted.
    async fn wait_backoff(&mut self, delay: Duration) -> Option<SessionEnd> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                command = self.cmd_rx.recv() => match command {
                    None => return Some(SessionEnd::Shutdown),
                    Some(Command::Disconnect { reply }) => {
                        // Cancels the pending retry timer.
                        self.set_state(ConnectionState::Disconnected);
                        let _ = reply.send(());
                        return Some(SessionEnd::Stopped);
                    }
                    Some(other) => self.apply_command(other).send(),
                },
                () = &mut sleep => return None,
            }
        }
    }

    /// Drive an established link until it drops or the session ends.
    ///
    /// The initial `connect()` caller is answered only after the replay
    /// flush, so a resolved `connect()` means queued commands and active
    /// subscriptions are already on the wire.
    async fn drive_link(
        &mut self,
        session: Session,
        initial_reply: &mut Option<oneshot::Sender<Result<(), ClientError>>>,
    ) -> LinkEnd {
        let Session { mut conn, heartbeat } = session;
        self.set_state(ConnectionState::Connected);

        // Topics subscribed on *this* link; the server forgot everything
        // from previous sessions.
        let mut subscribed: HashSet<Topic> = HashSet::new();

        if self.replay(&mut conn, &mut subscribed).await.is_err() {
            return LinkEnd::Dropped;
        }
        if let Some(reply) = initial_reply.take() {
            let _ = reply.send(Ok(()));
        }

        let interval = if heartbeat.is_zero() {
            self.config.heartbeat.interval()
        } else {
            heartbeat
        };
        let idle_limit = interval * self.config.heartbeat.idle_intervals.max(2);
        let mut ping = tokio::time::interval_at(Instant::now() + interval, interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_rx = Instant::now();

        loop {
            tokio::select! {
                biased;
                command = self.cmd_rx.recv() => match command {
                    None => {
                        let _ = conn.close().await;
                        return LinkEnd::Shutdown;
                    }
                    Some(Command::Disconnect { reply }) => {
                        let _ = conn.close().await;
                        self.set_state(ConnectionState::Disconnected);
                        let _ = reply.send(());
                        return LinkEnd::Stopped;
                    }
                    Some(other) => {
                        let deferred = self.apply_command(other);
                        let flushed = self.flush(&mut conn, &mut subscribed).await;
                        deferred.send();
                        if flushed.is_err() {
                            return LinkEnd::Dropped;
                        }
                    }
                },
                inbound = conn.recv() => match inbound {
                    Ok(Some(frame)) => {
                        last_rx = Instant::now();
                        if self
                            .handle_frame(&mut conn, frame, &mut subscribed)
                            .await
                            .is_err()
                        {
                            return LinkEnd::Dropped;
                        }
                    }
                    Ok(None) => {
                        info!("Server closed the connection");
                        return LinkEnd::Dropped;
                    }
                    Err(TransportError::Protocol(e)) => {
                        // One bad frame must not take down every topic.
                        warn!(error = %e, "Skipping malformed frame");
                    }
                    Err(e) => {
                        warn!(error = %e, "Receive failed");
                        return LinkEnd::Dropped;
                    }
                },
                _ = ping.tick() => {
                    if last_rx.elapsed() > idle_limit {
                        warn!(idle_ms = last_rx.elapsed().as_millis() as u64, "Connection idle past limit");
                        let _ = conn.close().await;
                        return LinkEnd::Dropped;
                    }
                    if conn.send(Frame::ping(None)).await.is_err() {
                        return LinkEnd::Dropped;
                    }
                }
            }
        }
    }

    /// Entry work for a fresh link: flush what queued up while
    /// disconnected (strict FIFO), then re-issue any active subscription
    /// the queue no longer carries.
    async fn replay(
        &mut self,
        conn: &mut Box<dyn Connection>,
        subscribed: &mut HashSet<Topic>,
    ) -> Result<(), TransportError> {
        self.flush(conn, subscribed).await?;

        for topic in self.router.active_topics() {
            if !subscribed.contains(&topic) {
                self.queue.push(OutboundCommand::Subscribe(topic));
            }
        }
        self.flush(conn, subscribed).await
    }

    /// Drain the outbound queue in FIFO order. On a send failure the
    /// failed command goes back to the front and the remainder stays
    /// queued for the next link.
    async fn flush(
        &mut self,
        conn: &mut Box<dyn Connection>,
        subscribed: &mut HashSet<Topic>,
    ) -> Result<(), TransportError> {
        while let Some(command) = self.queue.pop() {
            let action = flush_action(
                &command,
                self.router.refcount(command.topic()),
                subscribed.contains(command.topic()),
            );
            if action == FlushAction::Skip {
                trace!(topic = command.topic(), "Coalesced queued command");
                continue;
            }

            let frame = match &command {
                OutboundCommand::Subscribe(topic) => {
                    let id = self.next_id();
                    Frame::subscribe(id, topic.clone())
                }
                OutboundCommand::Unsubscribe(topic) => {
                    let id = self.next_id();
                    Frame::unsubscribe(id, topic.clone())
                }
                OutboundCommand::Emit { topic, payload } => {
                    Frame::publish(topic.clone(), payload.to_vec())
                }
            };

            if let Err(e) = conn.send(frame).await {
                warn!(error = %e, pending = self.queue.len() + 1, "Send failed mid-flush, re-queuing");
                self.queue.push_front(command);
                return Err(e);
            }

            match command {
                OutboundCommand::Subscribe(topic) => {
                    subscribed.insert(topic);
                }
                OutboundCommand::Unsubscribe(topic) => {
                    subscribed.remove(&topic);
                }
                OutboundCommand::Emit { .. } => {}
            }
        }
        Ok(())
    }

    /// React to one inbound frame on an established link.
    async fn handle_frame(
        &mut self,
        conn: &mut Box<dyn Connection>,
        frame: Frame,
        subscribed: &mut HashSet<Topic>,
    ) -> Result<(), TransportError> {
        match frame {
            Frame::Publish {
                topic,
                event,
                payload,
                ..
            } => {
                let delivery = self.router.dispatch(Inbound {
                    topic,
                    event,
                    payload: Bytes::from(payload),
                });
                // Consumers that vanished without unsubscribing release
                // their topics at the transport too.
                for topic in delivery.released {
                    self.queue.push(OutboundCommand::Unsubscribe(topic));
                }
                self.flush(conn, subscribed).await
            }
            Frame::Ping { timestamp } => conn.send(Frame::pong(timestamp)).await,
            Frame::Pong { .. } => Ok(()),
            Frame::Ack { id } => {
                trace!(id, "Request acknowledged");
                Ok(())
            }
            Frame::Error { id, code, message } => {
                // Per-topic failures are isolated: log and carry on.
                warn!(id, code, message = %message, "Server reported an error");
                Ok(())
            }
            other => {
                debug!(frame = ?other.frame_type(), "Ignoring unexpected frame");
                Ok(())
            }
        }
    }
}

/// Dial the endpoint and complete the handshake within `timeout`.
async fn establish(
    connector: Arc<dyn Connector>,
    endpoint: String,
    token: Option<String>,
    timeout: Duration,
) -> Result<Session, HandshakeError> {
    let deadline = Instant::now() + timeout;

    let mut conn = tokio::time::timeout_at(deadline, connector.connect(&endpoint))
        .await
        .map_err(|_| HandshakeError::Transport(TransportError::Timeout))??;

    conn.send(Frame::connect(PROTOCOL_VERSION.major, token))
        .await?;

    loop {
        let frame = tokio::time::timeout_at(deadline, conn.recv())
            .await
            .map_err(|_| HandshakeError::Transport(TransportError::Timeout))??;

        match frame {
            Some(Frame::Connected {
                connection_id,
                version,
                heartbeat,
            }) => {
                let server = Version::new(version, 0);
                if !PROTOCOL_VERSION.is_compatible_with(&server) {
                    return Err(HandshakeError::Transport(TransportError::Other(format!(
                        "Incompatible protocol version {server}"
                    ))));
                }
                debug!(
                    connection_id = %connection_id,
                    heartbeat,
                    transport = conn.transport(),
                    "Handshake complete"
                );
                return Ok(Session {
                    conn,
                    heartbeat: Duration::from_millis(u64::from(heartbeat)),
                });
            }
            Some(Frame::Error { code, message, .. }) if code == codes::AUTH_REJECTED => {
                return Err(HandshakeError::Auth(message));
            }
            Some(Frame::Error { code, message, .. }) => {
                return Err(HandshakeError::Transport(TransportError::Other(format!(
                    "Handshake rejected ({code}): {message}"
                ))));
            }
            Some(Frame::Ping { timestamp }) => {
                conn.send(Frame::pong(timestamp)).await?;
            }
            Some(other) => {
                trace!(frame = ?other.frame_type(), "Ignoring frame before Connected");
            }
            None => return Err(HandshakeError::Transport(TransportError::ConnectionClosed)),
        }
    }
}
