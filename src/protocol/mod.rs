//! Protocol Module
//!
//! Defines the KVD wire protocol: fixed-layout datagrams, one per operation.
//!
//! ## Packet Format
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────────────┬─────────────────┐
//! │ Op (1)   │ 0x00 (1) │ Len (2)  │ Key (32, NUL pad)│ Payload (Len)   │
//! └──────────┴──────────┴──────────┴──────────────────┴─────────────────┘
//! ```
//! `Len` is big-endian. `created` replies always carry 32 payload bytes and
//! their length field is ignored.
//!
//! ### Opcodes
//! - 0x00 create   → | 0x01 created  ←
//! - 0x02 request  → | 0x03 value    ← | 0x04 novalue ←
//! - 0x05 delete   → | 0x06 deleted  ←
//! - 0x07 sync     ←
//! - 0x0A update   → | 0x0B updated  ←
//! - 0x0C checksig →
//!
//! ### CheckSig Payload
//! ```text
//! ┌─────────┬──────────┬─────────┬─────────┬───────────┬──────────────┐
//! │ IdLen(1)│ Id       │ Type (1)│ SigLen(1)│ Signature │ Data (rest)  │
//! └─────────┴──────────┴─────────┴─────────┴───────────┴──────────────┘
//! ```

mod opcode;
mod message;
mod codec;
mod cookie;

pub use opcode::{OpKind, SigType};
pub use message::{CheckSig, Message, Payload};
pub use codec::{
    decode, decode_check_sig, encode, encode_check_sig, CREATED_PACKET_SIZE, HEADER_SIZE,
    KEY_SIZE, MAX_PAYLOAD_SIZE,
};
pub use cookie::{generate_request_key, REQUEST_KEY_LEN};
