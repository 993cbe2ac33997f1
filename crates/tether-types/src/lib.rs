//! Core types for the Tether agent relay client.
//!
//! This crate defines the data shared by the wire protocol, the multiplexer and
//! the reference relay: the addressed [`envelope::Envelope`], the Ed25519
//! [`identity::Identity`] used during registration, and the serde-backed
//! configuration structs. It contains no I/O beyond config file loading.

pub mod config;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod serde_compat;
