//! Errors from the wire protocol layer.

use crate::message::StatusCode;
use std::fmt;
use tether_types::error::TetherError;
use thiserror::Error;

/// Errors from the wire protocol layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// The relay could not be reached.
    #[error("Cannot reach relay at {addr}: {reason}")]
    Connect { addr: String, reason: String },
    /// The relay (or peer) rejected our identity.
    #[error("Handshake rejected ({code}): {reason}")]
    Handshake { code: StatusCode, reason: String },
    /// A frame did not contain a well-formed envelope.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),
    /// A write failed even after one reconnection and retry.
    #[error("Send failed: {0}")]
    Send(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Not connected")]
    NotConnected,
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u32, max: u32 },
    #[error("Protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch { local: u32, remote: u32 },
    /// `Multiplexer::start` could not bring its connections up.
    #[error("Multiplexer failed to start: {}", FailureList(.0))]
    Start(Vec<ConnectionFailure>),
    #[error("Unknown connection index {0}")]
    UnknownConnection(usize),
    /// No envelope arrived before the deadline.
    #[error("No envelope available")]
    Empty,
    #[error("Outbound queue full")]
    QueueFull,
    #[error("Shutting down")]
    ShuttingDown,
    #[error("Identity error: {0}")]
    Identity(#[from] TetherError),
}

impl WireError {
    /// Whether a fresh connection attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WireError::Io(_) | WireError::Connect { .. } | WireError::ConnectionClosed
        )
    }
}

/// One connection that failed to come up during `Multiplexer::start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionFailure {
    /// Position of the connection in the multiplexer.
    pub index: usize,
    /// Local agent address bound to the connection.
    pub address: String,
    /// Why `connect()` failed.
    pub reason: String,
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({}): {}", self.index, self.address, self.reason)
    }
}

struct FailureList<'a>(&'a [ConnectionFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}
