//! Multiplexer Module
//!
//! Request correlation and retry state machine.
//!
//! ## Responsibilities
//! - One `Request` per (reply kind, key); concurrent gets share it
//! - Retransmit with doubling timeout until replied or out of retries
//! - Complete every waiter of a request once, with the same outcome
//!
//! ## Request Lifecycle
//! ```text
//!  submit ──► send ──► timer ──► send ──► ... ──► timer ──► Timeout
//!               │                  │
//!               └──── reply ───────┴──► Reply (value / novalue / ...)
//! ```

mod completion;
mod request;
mod multiplexer;

pub use completion::{Call, Completion, Outcome, Reply};
pub use request::{Request, RequestId, Transmission};
pub use multiplexer::{Actions, Dispatch, Multiplexer};
