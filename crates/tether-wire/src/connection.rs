//! The capability set a multiplexer needs from a link.

use crate::error::WireError;
use async_trait::async_trait;
use std::fmt;
use tether_types::envelope::Envelope;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// A reconnection cycle gave up. Only an explicit `connect` leaves this state.
    Failed,
}

impl ConnectionState {
    /// Whether the connection is between two stable states.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A link that can carry envelopes for one local agent address.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// The local agent address this link is bound to.
    fn address(&self) -> &str;

    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Establish the link. Idempotent while connected.
    async fn connect(&self) -> Result<(), WireError>;

    /// Tear the link down. Idempotent.
    async fn disconnect(&self);

    async fn send(&self, envelope: &Envelope) -> Result<(), WireError>;

    /// Wait for the next inbound envelope.
    async fn receive(&self) -> Result<Envelope, WireError>;

    /// Emit a keep-alive on the link, if it has such a notion.
    async fn keepalive(&self) -> Result<(), WireError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitional_states() {
        assert!(ConnectionState::Connecting.is_transitional());
        assert!(ConnectionState::Reconnecting.is_transitional());
        assert!(!ConnectionState::Failed.is_transitional());
        assert_eq!(ConnectionState::Failed.to_string(), "failed");
    }
}
