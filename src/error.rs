//! Error types for the KVD client
//!
//! `KvdError` covers everything the public API can return. `CallError` is the
//! terminal failure of one logical call; it is `Clone` because the same outcome
//! is broadcast to every waiter attached to a request.

use thiserror::Error;

use crate::protocol::OpKind;

/// Result type alias using KvdError
pub type Result<T> = std::result::Result<T, KvdError>;

/// Unified error type for KVD client operations
#[derive(Debug, Error)]
pub enum KvdError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Codec Errors
    // -------------------------------------------------------------------------
    /// The operation cannot be represented on the wire
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Inbound bytes failed structural validation (includes JSON parse failures)
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    // -------------------------------------------------------------------------
    // Request Errors
    // -------------------------------------------------------------------------
    #[error("A different '{op}' for key '{key}' is already in flight")]
    InFlight { op: OpKind, key: String },

    #[error(transparent)]
    Call(#[from] CallError),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for KvdError {
    fn from(err: serde_json::Error) -> Self {
        KvdError::MalformedPacket(format!("invalid JSON payload: {}", err))
    }
}

/// Terminal failure of a logical call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Retry budget exhausted with no matching reply
    #[error("KVD request timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    /// The client was closed while the call was in flight
    #[error("KVD client shut down before a reply arrived")]
    Shutdown,
}
