//! HTTP long-polling fallback connector.
//!
//! For networks that block WebSocket upgrades. The same length-prefixed
//! frames travel over three HTTP routes relative to the endpoint:
//!
//! - `POST session` - open a session, response body is the session id
//! - `POST push?session=<id>` - deliver one client frame
//! - `GET poll?session=<id>` - long-poll; the response body carries zero
//!   or more concatenated frames, `204` means the poll timed out idle,
//!   `410` means the session is gone
//! - `DELETE session?session=<id>` - tear the session down

use async_trait::async_trait;
use bytes::BytesMut;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;
use uplink_protocol::{codec, Frame};

use crate::traits::{Connection, Connector, TransportError};

/// Long-polling connector configuration.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// How long a single poll request may hang server-side.
    pub poll_timeout: Duration,
    /// Extra client-side slack on top of `poll_timeout` before a request
    /// is abandoned.
    pub request_slack: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(25),
            request_slack: Duration::from_secs(5),
        }
    }
}

/// HTTP long-polling connector.
#[derive(Debug, Default)]
pub struct PollingConnector {
    config: PollingConfig,
}

impl PollingConnector {
    /// Create a connector with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connector with custom configuration.
    #[must_use]
    pub fn with_config(config: PollingConfig) -> Self {
        Self { config }
    }
}

/// Normalize an endpoint URL to an http:// or https:// base.
fn http_base(endpoint: &str) -> Result<Url, TransportError> {
    let http = if let Some(rest) = endpoint.strip_prefix("ws://") {
        format!("http://{rest}")
    } else if let Some(rest) = endpoint.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        return Err(TransportError::InvalidEndpoint(endpoint.to_string()));
    };

    Url::parse(&http).map_err(|e| TransportError::InvalidEndpoint(e.to_string()))
}

/// Append a path segment to a base URL without clobbering its path.
fn route(base: &Url, leaf: &str) -> Result<Url, TransportError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| TransportError::InvalidEndpoint(base.to_string()))?
        .pop_if_empty()
        .push(leaf);
    Ok(url)
}

#[async_trait]
impl Connector for PollingConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Connection>, TransportError> {
        let base = http_base(endpoint)?;
        let client = reqwest::Client::new();

        debug!(base = %base, "Opening long-poll session");

        let response = client
            .post(route(&base, "session")?)
            .timeout(self.config.request_slack)
            .send()
            .await
            .map_err(|e| TransportError::Other(format!("Session open failed: {e}")))?;

        if !response.status().is_success() {
            return Err(TransportError::Other(format!(
                "Session open rejected: {}",
                response.status()
            )));
        }

        let session = response
            .text()
            .await
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?
            .trim()
            .to_string();

        if session.is_empty() {
            return Err(TransportError::Other("Empty session id".into()));
        }

        debug!(session = %session, "Long-poll session open");

        Ok(Box::new(PollingConnection {
            client,
            base,
            session,
            config: self.config.clone(),
            read_buffer: BytesMut::with_capacity(4096),
            open: true,
        }))
    }

    fn name(&self) -> &'static str {
        "polling"
    }
}

/// An established long-polling session.
pub struct PollingConnection {
    client: reqwest::Client,
    base: Url,
    session: String,
    config: PollingConfig,
    read_buffer: BytesMut,
    open: bool,
}

impl PollingConnection {
    fn session_route(&self, leaf: &str) -> Result<Url, TransportError> {
        let mut url = route(&self.base, leaf)?;
        url.query_pairs_mut().append_pair("session", &self.session);
        Ok(url)
    }
}

#[async_trait]
impl Connection for PollingConnection {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            if let Some(frame) = codec::decode_from(&mut self.read_buffer)? {
                return Ok(Some(frame));
            }

            if !self.open {
                return Ok(None);
            }

            let response = self
                .client
                .get(self.session_route("poll")?)
                .timeout(self.config.poll_timeout + self.config.request_slack)
                .send()
                .await
                .map_err(|e| {
                    self.open = false;
                    TransportError::ReceiveFailed(e.to_string())
                })?;

            let status = response.status();
            if status == StatusCode::NO_CONTENT {
                // Idle poll, go around again.
            } else if status == StatusCode::GONE {
                debug!(session = %self.session, "Long-poll session gone");
                self.open = false;
                return Ok(None);
            } else if status.is_success() {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
                self.read_buffer.extend_from_slice(&body);
            } else {
                self.open = false;
                return Err(TransportError::ReceiveFailed(format!(
                    "Poll failed: {status}"
                )));
            }
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::ConnectionClosed);
        }

        let data = codec::encode(&frame)?;
        let response = self
            .client
            .post(self.session_route("push")?)
            .timeout(self.config.request_slack)
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        if response.status() == StatusCode::GONE {
            self.open = false;
            return Err(TransportError::ConnectionClosed);
        }
        if !response.status().is_success() {
            return Err(TransportError::SendFailed(format!(
                "Push rejected: {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        // Best-effort teardown; the server reaps idle sessions anyway.
        let url = self.session_route("session")?;
        if let Err(e) = self
            .client
            .delete(url)
            .timeout(self.config.request_slack)
            .send()
            .await
        {
            warn!(error = %e, "Session teardown failed");
        }

        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn transport(&self) -> &'static str {
        "polling"
    }
}
