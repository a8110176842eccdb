//! # uplink-core
//!
//! Multiplexed realtime subscription core for clients of an Uplink
//! server: one duplex connection carrying many logical topic streams
//! (live event updates, crowd density, IoT device state, notifications),
//! with reconnection, ordered replay, and reference-counted
//! subscriptions handled here so UI state holders don't have to.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐  subscribe/emit   ┌─────────────────────────────┐
//! │  Client   │──────────────────▶│        Driver task          │
//! │ (handles) │◀──────────────────│  ┌───────────┐ ┌─────────┐  │
//! └───────────┘   TopicEvents     │  │TopicRouter│ │Outbound │  │
//!                                 │  │+ Registry │ │ Queue   │  │
//!                                 │  └───────────┘ └─────────┘  │
//!                                 │        │   Connection   │   │
//!                                 │        └───── one ──────┘   │
//!                                 └─────────────────────────────┘
//! ```
//!
//! The driver task is the single owner of the transport connection, the
//! subscription registry, and the outbound queue; every mutation and
//! every dispatch is serialized through it.
//!
//! ## Guarantees
//!
//! - A topic is subscribed at the transport exactly while its local
//!   reference count is above zero.
//! - Commands issued while disconnected are never lost; they flush in
//!   original FIFO order on reconnect, before anything queued later.
//! - Reconnecting re-issues exactly the currently-active topic set.
//! - A consumer that unsubscribed never receives another update.
//! - Exhausting reconnect attempts delivers one `ConnectionLost` event
//!   per live subscription and parks the instance in `Closed`.

mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod queue;
pub mod registry;
pub mod router;
pub mod token;

pub use client::{Client, Subscription};
pub use config::{ClientConfig, ConfigError, DeliveryConfig, HeartbeatConfig, RetryConfig};
pub use connection::ConnectionState;
pub use error::ClientError;
pub use queue::OutboundCommand;
pub use registry::{
    validate_topic, Inbound, RegistryStats, SubscriptionHandle, Topic, TopicEvent,
    MAX_TOPIC_LENGTH,
};
pub use router::TopicRouter;
pub use token::{NoToken, StaticToken, TokenProvider};

pub use uplink_transport as transport;
