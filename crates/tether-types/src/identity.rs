//! Ed25519 agent identity used to prove address ownership to a relay.
//!
//! An agent's address is derived from its public key:
//! `hex(sha256(public_key))[..40]`. During registration the agent signs the
//! relay's public key concatenated with a fresh nonce, which the relay checks
//! against the public key carried in the same record.

use crate::error::{TetherError, TetherResult};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::fmt;

/// Default identity scheme identifier.
pub const DEFAULT_LEDGER_ID: &str = "ed25519";

/// Number of hex characters in a derived agent address.
pub const ADDRESS_LEN: usize = 40;

/// An agent's signing identity.
pub struct Identity {
    ledger_id: String,
    signing_key: SigningKey,
}

impl Identity {
    /// Generate a fresh random identity for the given scheme.
    pub fn generate(ledger_id: impl Into<String>) -> Self {
        Self {
            ledger_id: ledger_id.into(),
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restore an identity from a hex-encoded 32-byte secret key.
    pub fn from_secret_hex(ledger_id: impl Into<String>, secret_hex: &str) -> TetherResult<Self> {
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|e| TetherError::InvalidKey(format!("secret key is not hex: {e}")))?;
        let secret: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            TetherError::InvalidKey(format!(
                "invalid secret key length {} (expected 32 bytes)",
                bytes.len()
            ))
        })?;
        Ok(Self {
            ledger_id: ledger_id.into(),
            signing_key: SigningKey::from_bytes(&secret),
        })
    }

    /// The identity scheme this key is registered under.
    pub fn ledger_id(&self) -> &str {
        &self.ledger_id
    }

    /// Hex-encoded 32-byte public key.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// The agent address bound to this key.
    pub fn address(&self) -> String {
        derive_address(&self.signing_key.verifying_key().to_bytes())
    }

    /// Hex-encoded 32-byte secret key, for persisting a generated identity.
    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Sign `message` and return the hex-encoded signature.
    pub fn sign(&self, message: &[u8]) -> String {
        hex::encode(self.signing_key.sign(message).to_bytes())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("ledger_id", &self.ledger_id)
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Derive the agent address for a raw public key.
pub fn derive_address(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    let mut address = hex::encode(digest);
    address.truncate(ADDRESS_LEN);
    address
}

/// Derive the agent address for a hex-encoded public key.
pub fn address_from_public_key_hex(public_key_hex: &str) -> TetherResult<String> {
    let key = parse_public_key(public_key_hex)?;
    Ok(derive_address(&key.to_bytes()))
}

/// Verify a hex-encoded Ed25519 signature over `message`.
pub fn verify_signature(
    public_key_hex: &str,
    message: &[u8],
    signature_hex: &str,
) -> TetherResult<()> {
    let key = parse_public_key(public_key_hex)?;
    let sig_bytes = hex::decode(signature_hex)
        .map_err(|e| TetherError::InvalidSignature(format!("signature is not hex: {e}")))?;
    let sig_bytes: [u8; 64] = sig_bytes.as_slice().try_into().map_err(|_| {
        TetherError::InvalidSignature("invalid signature length (expected 64 bytes)".to_string())
    })?;
    let signature = Signature::from_bytes(&sig_bytes);
    key.verify(message, &signature)
        .map_err(|e| TetherError::InvalidSignature(e.to_string()))
}

fn parse_public_key(public_key_hex: &str) -> TetherResult<VerifyingKey> {
    let bytes = hex::decode(public_key_hex)
        .map_err(|e| TetherError::InvalidKey(format!("public key is not hex: {e}")))?;
    let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        TetherError::InvalidKey("invalid public key length (expected 32 bytes)".to_string())
    })?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| TetherError::InvalidKey(e.to_string()))
}
