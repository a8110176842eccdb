//! # uplink-protocol
//!
//! Wire protocol spoken between an Uplink client and a conforming server.
//!
//! All traffic on the duplex connection is a sequence of [`Frame`]s,
//! MessagePack-encoded behind a 4-byte length prefix. The client
//! multiplexes every logical topic stream over this one frame sequence.
//!
//! ## Frame types
//!
//! - `Connect` / `Connected` - handshake, carrying the bearer token and
//!   the negotiated heartbeat interval
//! - `Subscribe` / `Unsubscribe` - topic membership
//! - `Publish` - server push and client emit, both directions
//! - `Ack` / `Error` - request acknowledgments and failures
//! - `Ping` / `Pong` - keepalive
//!
//! ## Example
//!
//! ```rust
//! use uplink_protocol::{codec, Frame};
//!
//! let frame = Frame::subscribe(1, "event:42:update");
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{codes, Frame, FrameType};
pub use version::{Version, PROTOCOL_VERSION};
