//! Shared error types for the Tether types crate.

use thiserror::Error;

/// Errors raised while handling identity material and configuration.
#[derive(Error, Debug)]
pub enum TetherError {
    /// Key material could not be parsed.
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    /// A signature did not verify against the claimed public key.
    #[error("Signature verification failed: {0}")]
    InvalidSignature(String),

    /// A configuration file or value was rejected.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Alias for Result with TetherError.
pub type TetherResult<T> = Result<T, TetherError>;
