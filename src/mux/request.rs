//! In-flight request state
//!
//! One `Request` tracks a logical call across all of its retransmissions.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::protocol::{Message, OpKind};
use super::completion::{Call, Completion};

/// Identifies a request for the lifetime of its multiplexer
pub type RequestId = u64;

/// A packet to put on the wire, and the timer to arm after it
#[derive(Debug, Clone)]
pub struct Transmission {
    pub request: RequestId,

    /// Send attempt this timer belongs to; older timers are stale
    pub generation: u64,

    pub packet: Bytes,

    pub timeout: Duration,
}

pub struct Request {
    id: RequestId,
    message: Message,

    /// Encoded once up front so encoding errors surface before any send
    packet: Bytes,

    remaining_retries: u32,
    current_timeout: Duration,
    max_backoff: Duration,
    generation: u64,
    completion: Arc<Completion>,
}

impl Request {
    pub fn new(
        id: RequestId,
        message: Message,
        packet: Bytes,
        initial_timeout: Duration,
        max_retries: u32,
        max_backoff: Duration,
    ) -> Self {
        Self {
            id,
            message,
            packet,
            remaining_retries: max_retries,
            current_timeout: initial_timeout,
            max_backoff,
            generation: 0,
            completion: Completion::new(),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.message.key
    }

    pub fn op(&self) -> OpKind {
        self.message.op
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn packet(&self) -> &Bytes {
        &self.packet
    }

    /// Reply kinds this request is indexed under
    pub fn expected_replies(&self) -> &'static [OpKind] {
        self.message.op.expected_replies()
    }

    /// Attach another waiter
    pub fn attach(&self) -> Call {
        Call::new(Arc::clone(&self.completion))
    }

    pub fn completion(&self) -> &Arc<Completion> {
        &self.completion
    }

    pub fn remaining_retries(&self) -> u32 {
        self.remaining_retries
    }

    /// Timeout the next attempt will arm
    pub fn current_timeout(&self) -> Duration {
        self.current_timeout
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn can_retry(&self) -> bool {
        self.remaining_retries > 0
    }

    /// Number of transmissions so far
    pub fn attempts(&self) -> u32 {
        self.generation as u32
    }

    /// Consume one retry and produce the next transmission
    ///
    /// The timeout doubles for the following attempt, capped at the backoff limit.
    pub fn next_attempt(&mut self) -> Transmission {
        self.generation += 1;
        let transmission = Transmission {
            request: self.id,
            generation: self.generation,
            packet: self.packet.clone(),
            timeout: self.current_timeout,
        };
        self.remaining_retries = self.remaining_retries.saturating_sub(1);
        self.current_timeout = (self.current_timeout * 2).min(self.max_backoff);
        transmission
    }
}
