//! The addressed unit of data exchanged between agents.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An addressed, opaque message travelling between two agents.
///
/// `to` and `sender` are public because routing code may rewrite them (for
/// example when echoing an envelope back to its origin). The protocol id and
/// the payload are fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Destination agent address.
    pub to: String,
    /// Origin agent address.
    pub sender: String,
    /// Identifier of the schema the payload is encoded with.
    protocol_id: String,
    /// Opaque payload bytes.
    #[serde(with = "crate::serde_compat::base64_bytes")]
    message: Vec<u8>,
}

impl Envelope {
    /// Build a new envelope.
    pub fn new(
        to: impl Into<String>,
        sender: impl Into<String>,
        protocol_id: impl Into<String>,
        message: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            to: to.into(),
            sender: sender.into(),
            protocol_id: protocol_id.into(),
            message: message.into(),
        }
    }

    /// The payload schema identifier.
    pub fn protocol_id(&self) -> &str {
        &self.protocol_id
    }

    /// The opaque payload.
    pub fn message(&self) -> &[u8] {
        &self.message
    }

    /// Consume the envelope and return its payload.
    pub fn into_message(self) -> Vec<u8> {
        self.message
    }

    /// Swap `to` and `sender`, turning a delivered envelope into its echo.
    pub fn swap_addresses(&mut self) {
        std::mem::swap(&mut self.to, &mut self.sender);
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Envelope(to={}, sender={}, protocol_id={}, message_len={})",
            self.to,
            self.sender,
            self.protocol_id,
            self.message.len()
        )
    }
}
