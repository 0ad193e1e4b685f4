//! Protocol codec
//!
//! Stateless encoding and decoding of KVD packets.
//!
//! Decoding never panics on hostile input: every structural problem comes
//! back as `KvdError::MalformedPacket` so the receive path can drop it.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{KvdError, Result};
use super::{CheckSig, Message, OpKind, Payload, SigType};

/// Opcode (1) + reserved (1) + length (2)
pub const HEADER_SIZE: usize = 4;

/// Fixed key slot, NUL padded
pub const KEY_SIZE: usize = 32;

/// Exact size of every `created` reply
pub const CREATED_PACKET_SIZE: usize = HEADER_SIZE + KEY_SIZE + 32;

/// Largest payload the 16-bit length field can describe
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

const PAYLOAD_OFFSET: usize = HEADER_SIZE + KEY_SIZE;

/// First byte of every JSON object
const JSON_OBJECT_START: u8 = b'{';

// =============================================================================
// Packet Encoding/Decoding
// =============================================================================

/// Encode a message to a packet
///
/// Format: op (1) + 0x00 (1) + payload_len (2, BE) + key (32) + payload
pub fn encode(message: &Message) -> Result<Bytes> {
    if let OpKind::Unknown(code) = message.op {
        return Err(KvdError::Encoding(format!(
            "cannot encode unknown opcode 0x{:02x}",
            code
        )));
    }
    validate_key(&message.key)?;

    let payload = encode_payload(message)?;
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(KvdError::Encoding(format!(
            "payload too large: {} bytes (max {})",
            payload.len(),
            MAX_PAYLOAD_SIZE
        )));
    }

    let mut packet = BytesMut::with_capacity(PAYLOAD_OFFSET + payload.len());
    packet.put_u8(message.op.code());
    packet.put_u8(0);
    packet.put_u16(payload.len() as u16);
    packet.put_slice(message.key.as_bytes());
    packet.put_bytes(0, KEY_SIZE - message.key.len());
    packet.put_slice(&payload);

    Ok(packet.freeze())
}

/// Decode a packet into a message
pub fn decode(packet: &[u8]) -> Result<Message> {
    if packet.len() < HEADER_SIZE {
        return Err(KvdError::MalformedPacket(format!(
            "incomplete header: expected {} bytes, got {}",
            HEADER_SIZE,
            packet.len()
        )));
    }

    if packet[1] != 0 {
        return Err(KvdError::MalformedPacket(format!(
            "reserved byte is 0x{:02x}, expected 0x00",
            packet[1]
        )));
    }

    let declared_len = u16::from_be_bytes([packet[2], packet[3]]) as usize;
    let op = OpKind::from_code(packet[0]);

    // `created` replies ignore the length field and are always 68 bytes long.
    if op == OpKind::Created {
        if packet.len() != CREATED_PACKET_SIZE {
            return Err(KvdError::MalformedPacket(format!(
                "created reply must be {} bytes, got {}",
                CREATED_PACKET_SIZE,
                packet.len()
            )));
        }
    } else if packet.len() < PAYLOAD_OFFSET || declared_len != packet.len() - PAYLOAD_OFFSET {
        return Err(KvdError::MalformedPacket(format!(
            "length mismatch: header declares {} payload bytes, packet has {} total",
            declared_len,
            packet.len()
        )));
    }

    let key = decode_key(&packet[HEADER_SIZE..PAYLOAD_OFFSET])?;

    let body = &packet[PAYLOAD_OFFSET..];
    let payload = if body.is_empty() {
        None
    } else if op == OpKind::CheckSig {
        Some(Payload::CheckSig(decode_check_sig(body)?))
    } else if body[0] == JSON_OBJECT_START {
        let text = std::str::from_utf8(body)
            .map_err(|e| KvdError::MalformedPacket(format!("JSON payload is not UTF-8: {}", e)))?;
        Some(Payload::Json(serde_json::from_str(text)?))
    } else {
        match std::str::from_utf8(body) {
            Ok(text) => Some(Payload::Text(text.to_string())),
            Err(_) => Some(Payload::Bytes(Bytes::copy_from_slice(body))),
        }
    };

    Ok(Message { op, key, payload })
}

fn validate_key(key: &str) -> Result<()> {
    if key.len() > KEY_SIZE {
        return Err(KvdError::Encoding(format!(
            "key is {} bytes long (max {})",
            key.len(),
            KEY_SIZE
        )));
    }
    if !key.is_ascii() {
        return Err(KvdError::Encoding(format!("key '{}' is not ASCII", key)));
    }
    if key.bytes().any(|b| b == 0) {
        return Err(KvdError::Encoding("key contains a NUL byte".to_string()));
    }
    Ok(())
}

/// Key slot is NUL terminated within its fixed 32 bytes
fn decode_key(slot: &[u8]) -> Result<String> {
    let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
    let key = &slot[..end];
    if !key.is_ascii() {
        return Err(KvdError::MalformedPacket("key is not ASCII".to_string()));
    }
    // ASCII is always valid UTF-8
    Ok(key.iter().map(|&b| b as char).collect())
}

fn encode_payload(message: &Message) -> Result<Bytes> {
    if message.op == OpKind::CheckSig {
        return match &message.payload {
            Some(Payload::CheckSig(record)) => Ok(encode_check_sig(record)?.freeze()),
            _ => Err(KvdError::Encoding(
                "checksig requires a CheckSig payload".to_string(),
            )),
        };
    }

    match &message.payload {
        None => Ok(Bytes::new()),
        Some(Payload::CheckSig(_)) => Err(KvdError::Encoding(format!(
            "CheckSig payload is only valid on checksig, not '{}'",
            message.op
        ))),
        Some(payload) => payload.to_bytes(),
    }
}

// =============================================================================
// CheckSig Encoding/Decoding
// =============================================================================

/// Encode a CheckSig record
///
/// Format: id_len (1) + id + sig_type (1) + sig_len (1) + signature + data
pub fn encode_check_sig(record: &CheckSig) -> Result<BytesMut> {
    let id = record.subject_id.as_bytes();
    let id_len = u8::try_from(id.len()).map_err(|_| {
        KvdError::Encoding(format!("subject id is {} bytes long (max 255)", id.len()))
    })?;
    let sig_len = u8::try_from(record.signature.len()).map_err(|_| {
        KvdError::Encoding(format!(
            "signature is {} bytes long (max 255)",
            record.signature.len()
        ))
    })?;

    let mut buf =
        BytesMut::with_capacity(3 + id.len() + record.signature.len() + record.data.len());
    buf.put_u8(id_len);
    buf.put_slice(id);
    buf.put_u8(record.sig_type.code());
    buf.put_u8(sig_len);
    buf.put_slice(&record.signature);
    buf.put_slice(&record.data);
    Ok(buf)
}

/// Decode a CheckSig record; data is everything after the signature
pub fn decode_check_sig(body: &[u8]) -> Result<CheckSig> {
    let truncated = |what: &str| KvdError::MalformedPacket(format!("checksig: missing {}", what));

    let (&id_len, rest) = body.split_first().ok_or_else(|| truncated("subject id length"))?;
    let id_len = id_len as usize;
    if rest.len() < id_len {
        return Err(truncated("subject id"));
    }
    let (id, rest) = rest.split_at(id_len);
    let subject_id = std::str::from_utf8(id)
        .map_err(|e| KvdError::MalformedPacket(format!("checksig: subject id not UTF-8: {}", e)))?
        .to_string();

    let (&type_code, rest) = rest.split_first().ok_or_else(|| truncated("signature type"))?;
    let sig_type = SigType::from_code(type_code).ok_or_else(|| {
        KvdError::MalformedPacket(format!("checksig: unknown signature type {}", type_code))
    })?;

    let (&sig_len, rest) = rest.split_first().ok_or_else(|| truncated("signature length"))?;
    let sig_len = sig_len as usize;
    if rest.len() < sig_len {
        return Err(truncated("signature"));
    }
    let (signature, data) = rest.split_at(sig_len);

    Ok(CheckSig {
        subject_id,
        sig_type,
        signature: Bytes::copy_from_slice(signature),
        data: Bytes::copy_from_slice(data),
    })
}
