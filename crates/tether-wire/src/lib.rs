//! Tether wire protocol: relay client, multiplexer and reference relay.
//!
//! An agent attaches to a relay node over TCP, registers its identity with a
//! signed record, then exchanges length-framed envelopes through it. Broken
//! links are repaired in place with a bounded reconnection cycle.
//!
//! ## Architecture
//!
//! - **codec**: envelope payload encoding and 4-byte big-endian framing
//! - **Channel**: a reopenable framed byte stream (`TcpChannel`)
//! - **NodeClient**: one authenticated relay link with reconnection
//! - **Connection**: the capability set the multiplexer drives
//! - **Multiplexer**: shared inbound/outbound queues over many connections
//! - **RelayNode**: a reference relay that validates registrations, forwards
//!   envelopes and peers with other relays

pub mod channel;
pub mod client;
pub mod codec;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod local;
pub mod message;
pub mod multiplexer;
pub mod registry;
pub mod relay;
pub mod retry;

pub use channel::{Channel, TcpChannel};
pub use client::NodeClient;
pub use codec::{EnvelopeCodec, ProtocolLookup};
pub use connection::{Connection, ConnectionState};
pub use error::{ConnectionFailure, WireError};
pub use local::LocalConnection;
pub use message::{HandshakeRecord, StatusCode};
pub use multiplexer::Multiplexer;
pub use registry::{PeerEntry, PeerRegistry};
pub use relay::RelayNode;
