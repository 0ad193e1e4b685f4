//! # kvd-client
//!
//! Client for the KVD key-value protocol, spoken over UDP:
//! - Fixed-layout binary packets (opcode, 32-byte key, optional payload)
//! - Replies arrive out of order and are matched to requests by (kind, key)
//! - Lost packets are retransmitted with a doubling timeout
//! - Concurrent gets for the same key share one request
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        KvdClient                             │
//! │          get / create / update / delete / checksig           │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     Multiplexer                              │
//! │       (index tables per reply kind, retry state)             │
//! └──────────┬──────────────────────────────────┬───────────────┘
//!            │                                  │
//!            ▼                                  ▼
//!   ┌─────────────────┐                ┌─────────────────┐
//!   │      Codec      │                │     Network     │
//!   │ (encode/decode) │                │ (UDP + timers)  │
//!   └─────────────────┘                └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod mux;
pub mod network;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CallError, KvdError, Result};
pub use config::ClientConfig;
pub use client::KvdClient;
pub use mux::{Call, Reply};
pub use protocol::{CheckSig, Message, OpKind, Payload, SigType};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of kvd-client
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
