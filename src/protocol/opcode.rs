//! Opcode and signature-type definitions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Operation kinds carried in the first byte of every packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Create,
    Created,
    Request,
    Value,
    NoValue,
    Delete,
    Deleted,
    Sync,
    Update,
    Updated,
    CheckSig,
    /// Any code with no assigned operation (8, 9, and everything above 12)
    Unknown(u8),
}

impl OpKind {
    /// Reply kinds the multiplexer keeps an index for
    pub const REPLIES: [OpKind; 5] = [
        OpKind::Created,
        OpKind::Value,
        OpKind::NoValue,
        OpKind::Deleted,
        OpKind::Updated,
    ];

    /// Map a wire code to its operation
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => OpKind::Create,
            1 => OpKind::Created,
            2 => OpKind::Request,
            3 => OpKind::Value,
            4 => OpKind::NoValue,
            5 => OpKind::Delete,
            6 => OpKind::Deleted,
            7 => OpKind::Sync,
            10 => OpKind::Update,
            11 => OpKind::Updated,
            12 => OpKind::CheckSig,
            other => OpKind::Unknown(other),
        }
    }

    /// The wire code of this operation
    pub fn code(self) -> u8 {
        match self {
            OpKind::Create => 0,
            OpKind::Created => 1,
            OpKind::Request => 2,
            OpKind::Value => 3,
            OpKind::NoValue => 4,
            OpKind::Delete => 5,
            OpKind::Deleted => 6,
            OpKind::Sync => 7,
            OpKind::Update => 10,
            OpKind::Updated => 11,
            OpKind::CheckSig => 12,
            OpKind::Unknown(code) => code,
        }
    }

    /// Whether this kind completes a client request
    pub fn is_reply(self) -> bool {
        Self::REPLIES.contains(&self)
    }

    /// Reply kinds that complete a request of this kind
    pub fn expected_replies(self) -> &'static [OpKind] {
        match self {
            OpKind::Request | OpKind::CheckSig => &[OpKind::Value, OpKind::NoValue],
            OpKind::Create => &[OpKind::Created],
            OpKind::Delete => &[OpKind::Deleted],
            OpKind::Update => &[OpKind::Updated],
            _ => &[],
        }
    }

    /// Replies of this kind carry a value back to the caller
    pub fn carries_value(self) -> bool {
        matches!(self, OpKind::Value | OpKind::Created)
    }

    pub fn name(self) -> &'static str {
        match self {
            OpKind::Create => "create",
            OpKind::Created => "created",
            OpKind::Request => "request",
            OpKind::Value => "value",
            OpKind::NoValue => "novalue",
            OpKind::Delete => "delete",
            OpKind::Deleted => "deleted",
            OpKind::Sync => "sync",
            OpKind::Update => "update",
            OpKind::Updated => "updated",
            OpKind::CheckSig => "checksig",
            OpKind::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Unknown(code) => write!(f, "unknown(0x{:02x})", code),
            other => f.write_str(other.name()),
        }
    }
}

/// Signature algorithms understood by `checksig`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SigType {
    HmacSha1,
    HmacSha256,
    RsaSha1,
    RsaSha256,
}

impl SigType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(SigType::HmacSha1),
            2 => Some(SigType::HmacSha256),
            3 => Some(SigType::RsaSha1),
            4 => Some(SigType::RsaSha256),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            SigType::HmacSha1 => 1,
            SigType::HmacSha256 => 2,
            SigType::RsaSha1 => 3,
            SigType::RsaSha256 => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SigType::HmacSha1 => "hmac-sha1",
            SigType::HmacSha256 => "hmac-sha256",
            SigType::RsaSha1 => "rsa-sha1",
            SigType::RsaSha256 => "rsa-sha256",
        }
    }
}

impl fmt::Display for SigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SigType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hmac-sha1" => Ok(SigType::HmacSha1),
            "hmac-sha256" => Ok(SigType::HmacSha256),
            "rsa-sha1" => Ok(SigType::RsaSha1),
            "rsa-sha256" => Ok(SigType::RsaSha256),
            other => Err(format!("unknown signature type '{}'", other)),
        }
    }
}
