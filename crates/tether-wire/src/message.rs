//! Control records exchanged outside the envelope stream.
//!
//! Registration and relay peering use JSON records carried in the same
//! length-prefixed frames as envelopes, each tagged by `type`. Messages on an
//! established relay-to-relay link add a one-byte kind header.

use crate::codec::{decode_envelope, encode_envelope};
use crate::error::WireError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tether_types::envelope::Envelope;

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Outcome code of a registration or peering attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Success,
    UnsupportedVersion,
    UnexpectedPayload,
    Generic,
    Decode,
    WrongAgentAddress,
    WrongPublicKey,
    InvalidProof,
    UnsupportedLedger,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Success => "success",
            StatusCode::UnsupportedVersion => "unsupported_version",
            StatusCode::UnexpectedPayload => "unexpected_payload",
            StatusCode::Generic => "generic",
            StatusCode::Decode => "decode",
            StatusCode::WrongAgentAddress => "wrong_agent_address",
            StatusCode::WrongPublicKey => "wrong_public_key",
            StatusCode::InvalidProof => "invalid_proof",
            StatusCode::UnsupportedLedger => "unsupported_ledger",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signed registration record an agent presents to its relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Claimed agent address.
    pub address: String,
    /// Hex-encoded public key the address is derived from.
    pub public_key: String,
    /// Hex-encoded public key of the relay being registered with.
    pub peer_public_key: String,
    /// Identity scheme of `public_key`.
    pub ledger_id: String,
    /// Fresh nonce included in the signed payload.
    pub nonce: String,
    /// Hex signature over `peer_public_key` followed by `nonce`.
    pub signature: String,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,
}

fn default_protocol_version() -> u32 {
    PROTOCOL_VERSION
}

/// Relay-to-relay hello, sent by the dialing relay and echoed as an ack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerHello {
    pub node_id: String,
    pub node_name: String,
    pub protocol_version: u32,
    /// Agent addresses currently attached to the sending relay.
    #[serde(default)]
    pub agents: Vec<String>,
    /// Random nonce for HMAC authentication.
    pub nonce: String,
    /// HMAC-SHA256(shared_secret, nonce + node_id).
    pub auth_hmac: String,
}

/// Handshake records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandshakeRecord {
    /// Client registration.
    Register { record: AgentRecord },
    /// Relay verdict on a registration or peering attempt.
    Status {
        code: StatusCode,
        #[serde(default)]
        msgs: Vec<String>,
    },
    PeerHello(PeerHello),
    PeerAck(PeerHello),
}

impl HandshakeRecord {
    /// A `Status` record with a single message.
    pub fn status(code: StatusCode, msg: impl Into<String>) -> Self {
        HandshakeRecord::Status {
            code,
            msgs: vec![msg.into()],
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Messages on an established relay-to-relay link.
///
/// Each message is one frame whose first byte is a kind tag. A forwarded
/// envelope follows in the binary envelope encoding, so a peer frame is never
/// more than one byte larger than the client frame it carries. Agent
/// announcements follow as JSON tagged by `"type"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    /// An envelope for an agent attached to the receiving relay.
    #[serde(skip)]
    Forward { envelope: Envelope },
    /// An agent attached to the sending relay.
    AgentRegistered { address: String },
    /// An agent left the sending relay.
    AgentUnregistered { address: String },
}

const PEER_FORWARD: u8 = 0x01;
const PEER_NOTICE: u8 = 0x02;

impl PeerMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        match self {
            PeerMessage::Forward { envelope } => {
                let payload = encode_envelope(envelope);
                let mut bytes = Vec::with_capacity(1 + payload.len());
                bytes.push(PEER_FORWARD);
                bytes.extend_from_slice(&payload);
                Ok(bytes)
            }
            notice => {
                let mut bytes = vec![PEER_NOTICE];
                serde_json::to_writer(&mut bytes, notice)?;
                Ok(bytes)
            }
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        match bytes.split_first() {
            Some((&PEER_FORWARD, payload)) => Ok(PeerMessage::Forward {
                envelope: decode_envelope(payload)?,
            }),
            Some((&PEER_NOTICE, json)) => Ok(serde_json::from_slice(json)?),
            Some((tag, _)) => Err(WireError::MalformedEnvelope(format!(
                "unknown peer message kind 0x{tag:02x}"
            ))),
            None => Err(WireError::MalformedEnvelope("empty peer message".to_string())),
        }
    }
}
