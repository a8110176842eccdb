//! Transport fallback chain.
//!
//! Tries connectors in priority order (WebSocket first, long-polling
//! last) so the subscription core never has to know which transport
//! finally carried the connection.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::traits::{Connection, Connector, TransportError};

/// A connector that tries a list of connectors in order of preference.
pub struct FallbackConnector {
    connectors: Vec<Arc<dyn Connector>>,
}

impl FallbackConnector {
    /// Create a fallback chain. The first connector has highest priority.
    #[must_use]
    pub fn new(connectors: Vec<Arc<dyn Connector>>) -> Self {
        Self { connectors }
    }

    /// Append a connector to the chain.
    pub fn add_connector(&mut self, connector: Arc<dyn Connector>) {
        self.connectors.push(connector);
    }

    /// Connector names in priority order.
    #[must_use]
    pub fn connector_names(&self) -> Vec<&'static str> {
        self.connectors.iter().map(|c| c.name()).collect()
    }
}

#[async_trait]
impl Connector for FallbackConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Connection>, TransportError> {
        let mut last_error = None;

        for connector in &self.connectors {
            if !connector.is_available() {
                debug!(transport = connector.name(), "Skipping unavailable transport");
                continue;
            }

            match connector.connect(endpoint).await {
                Ok(conn) => {
                    debug!(transport = connector.name(), "Transport selected");
                    return Ok(conn);
                }
                Err(e) => {
                    warn!(transport = connector.name(), error = %e, "Transport failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| TransportError::Other("No transport available".into())))
    }

    fn name(&self) -> &'static str {
        "fallback"
    }

    fn is_available(&self) -> bool {
        self.connectors.iter().any(|c| c.is_available())
    }
}
