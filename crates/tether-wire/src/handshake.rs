//! Registration and peering handshakes.
//!
//! A client proves ownership of its address by signing the relay's public key
//! followed by a fresh nonce. Relays authenticate each other with
//! HMAC-SHA256 over `nonce + node_id` keyed by a shared secret.

use crate::channel::Channel;
use crate::error::WireError;
use crate::message::{AgentRecord, HandshakeRecord, PeerHello, StatusCode, PROTOCOL_VERSION};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use tether_types::identity::{address_from_public_key_hex, verify_signature, Identity};
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Generate HMAC-SHA256 signature for relay peer authentication.
pub(crate) fn hmac_sign(secret: &str, data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify HMAC-SHA256 signature using constant-time comparison.
pub(crate) fn hmac_verify(secret: &str, data: &[u8], signature: &str) -> bool {
    let expected = hmac_sign(secret, data);
    subtle::ConstantTimeEq::ct_eq(expected.as_bytes(), signature.as_bytes()).into()
}

/// The bytes a client signs during registration.
pub fn proof_payload(relay_public_key: &str, nonce: &str) -> Vec<u8> {
    format!("{relay_public_key}{nonce}").into_bytes()
}

impl AgentRecord {
    /// Build a signed registration record for `relay_public_key`.
    pub fn sign(identity: &Identity, relay_public_key: &str) -> Self {
        let nonce = uuid::Uuid::new_v4().to_string();
        let signature = identity.sign(&proof_payload(relay_public_key, &nonce));
        Self {
            address: identity.address(),
            public_key: identity.public_key_hex(),
            peer_public_key: relay_public_key.to_string(),
            ledger_id: identity.ledger_id().to_string(),
            nonce,
            signature,
            protocol_version: PROTOCOL_VERSION,
        }
    }

    /// Relay-side validation. Returns the rejection code and reason on failure.
    pub fn validate(
        &self,
        relay_public_key: &str,
        supported_ledgers: &[String],
    ) -> Result<(), (StatusCode, String)> {
        if self.protocol_version != PROTOCOL_VERSION {
            return Err((
                StatusCode::UnsupportedVersion,
                format!(
                    "Protocol version mismatch: expected {}, got {}",
                    PROTOCOL_VERSION, self.protocol_version
                ),
            ));
        }
        if !supported_ledgers.iter().any(|l| l == &self.ledger_id) {
            return Err((
                StatusCode::UnsupportedLedger,
                format!("Ledger '{}' is not supported", self.ledger_id),
            ));
        }
        if self.peer_public_key != relay_public_key {
            return Err((
                StatusCode::WrongPublicKey,
                "Record is addressed to a different relay key".to_string(),
            ));
        }
        let derived = address_from_public_key_hex(&self.public_key)
            .map_err(|e| (StatusCode::Decode, e.to_string()))?;
        if derived != self.address {
            return Err((
                StatusCode::WrongAgentAddress,
                format!("Address {} does not match public key", self.address),
            ));
        }
        verify_signature(
            &self.public_key,
            &proof_payload(&self.peer_public_key, &self.nonce),
            &self.signature,
        )
        .map_err(|e| (StatusCode::InvalidProof, e.to_string()))
    }
}

impl PeerHello {
    /// Build an authenticated hello for this relay.
    pub fn new(
        node_id: impl Into<String>,
        node_name: impl Into<String>,
        agents: Vec<String>,
        shared_secret: &str,
    ) -> Self {
        let node_id = node_id.into();
        let nonce = uuid::Uuid::new_v4().to_string();
        let auth_hmac = hmac_sign(shared_secret, format!("{nonce}{node_id}").as_bytes());
        Self {
            node_id,
            node_name: node_name.into(),
            protocol_version: PROTOCOL_VERSION,
            agents,
            nonce,
            auth_hmac,
        }
    }

    /// Check version and HMAC. An empty secret never authenticates.
    pub fn verify(&self, shared_secret: &str) -> Result<(), (StatusCode, String)> {
        if self.protocol_version != PROTOCOL_VERSION {
            return Err((
                StatusCode::UnsupportedVersion,
                format!(
                    "Protocol version mismatch: expected {}, got {}",
                    PROTOCOL_VERSION, self.protocol_version
                ),
            ));
        }
        if shared_secret.is_empty() {
            return Err((
                StatusCode::Generic,
                "Relay peering is disabled (no shared_secret)".to_string(),
            ));
        }
        let data = format!("{}{}", self.nonce, self.node_id);
        if !hmac_verify(shared_secret, data.as_bytes(), &self.auth_hmac) {
            return Err((
                StatusCode::InvalidProof,
                "HMAC authentication failed".to_string(),
            ));
        }
        Ok(())
    }
}

/// Run the client side of registration over an open channel.
///
/// Succeeds only on a `Status` record with code `success`.
pub async fn register(
    channel: &dyn Channel,
    identity: &Identity,
    relay_public_key: &str,
    timeout: Duration,
) -> Result<(), WireError> {
    let record = AgentRecord::sign(identity, relay_public_key);
    channel
        .write_frame(&HandshakeRecord::Register { record }.to_bytes()?)
        .await?;

    let reply = tokio::time::timeout(timeout, channel.read_frame())
        .await
        .map_err(|_| WireError::Connect {
            addr: channel.remote().to_string(),
            reason: format!("no registration reply within {timeout:?}"),
        })??;

    match HandshakeRecord::from_bytes(&reply) {
        Ok(HandshakeRecord::Status {
            code: StatusCode::Success,
            ..
        }) => {
            debug!("client: registered {} with {}", identity.address(), channel.remote());
            Ok(())
        }
        Ok(HandshakeRecord::Status { code, msgs }) => Err(WireError::Handshake {
            code,
            reason: msgs.join("; "),
        }),
        Ok(other) => Err(WireError::Handshake {
            code: StatusCode::UnexpectedPayload,
            reason: format!("unexpected reply to registration: {other:?}"),
        }),
        Err(e) => Err(WireError::Handshake {
            code: StatusCode::Decode,
            reason: e.to_string(),
        }),
    }
}
