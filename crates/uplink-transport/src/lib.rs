//! # uplink-transport
//!
//! Client-side transport layer for the Uplink realtime subscription core.
//!
//! The core owns exactly one duplex connection at a time and never cares
//! how the bytes move. Everything behind that is expressed by two traits:
//!
//! - [`Connector`] - dials an endpoint and produces a connection
//! - [`Connection`] - an established duplex frame stream
//!
//! Two connectors are provided:
//!
//! - **WebSocket** (default feature `websocket`) - the standard path
//! - **HTTP long-polling** (feature `polling`) - for networks that block
//!   WebSocket upgrades
//!
//! [`fallback::FallbackConnector`] chains connectors in priority order so
//! transport selection stays out of the core.

pub mod fallback;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "polling")]
pub mod polling;

pub use fallback::FallbackConnector;
pub use traits::{Connection, Connector, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;

#[cfg(feature = "polling")]
pub use polling::PollingConnector;
