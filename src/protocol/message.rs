//! Message definitions
//!
//! The in-memory form of a KVD packet.

use bytes::Bytes;
use serde_json::Value;

use crate::error::{KvdError, Result};
use super::{OpKind, SigType};

/// A decoded (or to-be-encoded) packet
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Operation kind
    pub op: OpKind,

    /// Key, at most 32 ASCII bytes with no embedded NUL
    pub key: String,

    /// Optional payload
    pub payload: Option<Payload>,
}

impl Message {
    pub fn new(op: OpKind, key: impl Into<String>, payload: Option<Payload>) -> Self {
        Self {
            op,
            key: key.into(),
            payload,
        }
    }
}

/// Payload shapes a packet can carry
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// UTF-8 text
    Text(String),

    /// Opaque bytes, passed through unchanged
    Bytes(Bytes),

    /// Structured value, carried as its JSON text
    Json(Value),

    /// Signature-check record (only valid on `checksig`)
    CheckSig(CheckSig),
}

impl Payload {
    /// The bytes this payload occupies on the wire
    ///
    /// Fails when a CheckSig field is too long for its length byte.
    pub fn to_bytes(&self) -> Result<Bytes> {
        match self {
            Payload::Text(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
            Payload::Bytes(bytes) => Ok(bytes.clone()),
            Payload::Json(value) => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(|e| KvdError::Encoding(format!("unserializable payload: {}", e))),
            Payload::CheckSig(record) => Ok(super::encode_check_sig(record)?.freeze()),
        }
    }

    /// Text view, when the payload is textual
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(bytes))
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Bytes(bytes)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<CheckSig> for Payload {
    fn from(record: CheckSig) -> Self {
        Payload::CheckSig(record)
    }
}

/// Signature-verification request record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSig {
    /// Identity whose key signed the data
    pub subject_id: String,

    /// Signature algorithm
    pub sig_type: SigType,

    /// Signature bytes (at most 255)
    pub signature: Bytes,

    /// Signed data
    pub data: Bytes,
}

impl CheckSig {
    pub fn new(
        sig_type: SigType,
        subject_id: impl Into<String>,
        signature: impl Into<Bytes>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            sig_type,
            signature: signature.into(),
            data: data.into(),
        }
    }
}
