//! In-memory scripted transport for driving the core without a network.
//!
//! Records every frame the client sends, answers the handshake according
//! to a per-attempt plan, and lets tests inject server frames, receive
//! errors, and link drops.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uplink_core::{Client, ConnectionState};
use uplink_protocol::{codes, Frame};
use uplink_transport::{Connection, Connector, TransportError};

/// Scripted behavior for one connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Attempt {
    /// Accept the dial and the handshake.
    #[default]
    Accept,
    /// Fail the dial at the transport level.
    Refuse,
    /// Accept the dial, reject the credential during the handshake.
    RejectAuth,
}

#[derive(Default)]
struct Shared {
    plan: VecDeque<Attempt>,
    default_attempt: Attempt,
    connects: u32,
    sent: Vec<Frame>,
    tokens: Vec<Option<String>>,
    inbound: Option<mpsc::UnboundedSender<Result<Frame, TransportError>>>,
    link_open: Option<Arc<AtomicBool>>,
}

/// Handle shared between the test body and the connections it spawns.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    shared: Arc<Mutex<Shared>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue behaviors for the next connect attempts, in order.
    pub fn plan(&self, attempts: &[Attempt]) {
        self.shared.lock().unwrap().plan.extend(attempts);
    }

    /// Behavior once the plan runs out.
    pub fn set_default(&self, attempt: Attempt) {
        self.shared.lock().unwrap().default_attempt = attempt;
    }

    /// Number of transport-level connect attempts so far.
    pub fn connects(&self) -> u32 {
        self.shared.lock().unwrap().connects
    }

    /// Every frame the client has sent, across all sessions.
    pub fn sent(&self) -> Vec<Frame> {
        self.shared.lock().unwrap().sent.clone()
    }

    /// Sent frames grouped by session (split on Connect frames).
    pub fn sessions(&self) -> Vec<Vec<Frame>> {
        let mut sessions: Vec<Vec<Frame>> = Vec::new();
        for frame in self.sent() {
            if matches!(frame, Frame::Connect { .. }) {
                sessions.push(Vec::new());
            } else if let Some(current) = sessions.last_mut() {
                current.push(frame);
            }
        }
        sessions
    }

    /// Tokens presented in Connect frames, in handshake order.
    pub fn tokens(&self) -> Vec<Option<String>> {
        self.shared.lock().unwrap().tokens.clone()
    }

    pub fn count_subscribes(&self, topic: &str) -> usize {
        self.sent()
            .iter()
            .filter(|f| matches!(f, Frame::Subscribe { topic: t, .. } if t == topic))
            .count()
    }

    pub fn count_unsubscribes(&self, topic: &str) -> usize {
        self.sent()
            .iter()
            .filter(|f| matches!(f, Frame::Unsubscribe { topic: t, .. } if t == topic))
            .count()
    }

    /// Push a server frame onto the live link.
    pub fn push_frame(&self, frame: Frame) {
        let shared = self.shared.lock().unwrap();
        let tx = shared.inbound.as_ref().expect("no live link");
        tx.send(Ok(frame)).expect("link receiver gone");
    }

    /// Make the next receive on the live link fail with `error`.
    pub fn inject_recv_error(&self, error: TransportError) {
        let shared = self.shared.lock().unwrap();
        let tx = shared.inbound.as_ref().expect("no live link");
        tx.send(Err(error)).expect("link receiver gone");
    }

    /// Drop the live link: pending receives end, later sends fail.
    pub fn kill_link(&self) {
        let mut shared = self.shared.lock().unwrap();
        if let Some(open) = shared.link_open.take() {
            open.store(false, Ordering::SeqCst);
        }
        shared.inbound = None;
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl Connector for ScriptedTransport {
    async fn connect(&self, _endpoint: &str) -> Result<Box<dyn Connection>, TransportError> {
        let mut shared = self.shared.lock().unwrap();
        shared.connects += 1;
        let attempt = shared
            .plan
            .pop_front()
            .unwrap_or(shared.default_attempt);

        match attempt {
            Attempt::Refuse => Err(TransportError::Other("scripted refusal".into())),
            mode => {
                let (tx, rx) = mpsc::unbounded_channel();
                let open = Arc::new(AtomicBool::new(true));
                shared.inbound = Some(tx);
                shared.link_open = Some(Arc::clone(&open));
                Ok(Box::new(ScriptedConnection {
                    shared: Arc::clone(&self.shared),
                    rx,
                    open,
                    mode,
                }))
            }
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct ScriptedConnection {
    shared: Arc<Mutex<Shared>>,
    rx: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
    open: Arc<AtomicBool>,
    mode: Attempt,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.rx.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(error)) => Err(error),
            None => Ok(None),
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let mut shared = self.shared.lock().unwrap();
        if let Frame::Connect { token, .. } = &frame {
            shared.tokens.push(token.clone());
            let reply = match self.mode {
                Attempt::Accept => {
                    Frame::connected(format!("conn-{}", shared.connects), 1, 60_000)
                }
                Attempt::RejectAuth => Frame::error(0, codes::AUTH_REJECTED, "bad token"),
                Attempt::Refuse => unreachable!("refused attempts never connect"),
            };
            if let Some(tx) = &shared.inbound {
                let _ = tx.send(Ok(reply));
            }
        }
        shared.sent.push(frame);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn transport(&self) -> &'static str {
        "scripted"
    }
}

/// Opt-in driver logs for a test run (RUST_LOG=uplink_core=trace).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `condition` every 10ms until it holds, or panic after two
/// seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}

/// Wait until the client reports `want`, or panic after two seconds.
pub async fn wait_for_state(client: &Client, want: ConnectionState) {
    let mut rx = client.state_changes();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if *rx.borrow_and_update() == want {
                return;
            }
            rx.changed().await.expect("driver task gone");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for state {want:?}"));
}
