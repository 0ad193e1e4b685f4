//! Request Multiplexer
//!
//! Owns every in-flight request and the per-reply-kind index tables.
//! It performs no I/O: each entry point returns the `Actions` the driver
//! must carry out (packets to send, timers to arm, calls to complete).
//!
//! ## Index Tables
//! ```text
//!   request / checksig  →  value, novalue
//!   create              →  created
//!   update              →  updated
//!   delete              →  deleted
//! ```
//! A request is reachable from every table it is listed under and is removed
//! from all of them at once when it completes.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RetryPolicy;
use crate::error::{CallError, KvdError, Result};
use crate::protocol::{self, CheckSig, Message, OpKind, Payload};
use super::completion::{Call, Completion, Outcome, Reply};
use super::request::{Request, RequestId, Transmission};

/// What happened to an inbound datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Completed an in-flight request
    Delivered,

    /// Well-formed reply with no matching request
    Unsolicited,

    /// Not a reply kind (`sync`, requests, unknown opcodes)
    Discarded,

    /// Failed structural validation
    Malformed,
}

/// Work the driver must perform after a multiplexer step
#[must_use]
#[derive(Default)]
pub struct Actions {
    transmissions: Vec<Transmission>,
    settlements: Vec<(Arc<Completion>, Outcome)>,
}

impl Actions {
    fn transmit(transmission: Transmission) -> Self {
        Self {
            transmissions: vec![transmission],
            settlements: Vec::new(),
        }
    }

    fn settle_with(completion: Arc<Completion>, outcome: Outcome) -> Self {
        Self {
            transmissions: Vec::new(),
            settlements: vec![(completion, outcome)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.transmissions.is_empty() && self.settlements.is_empty()
    }

    pub fn transmissions(&self) -> &[Transmission] {
        &self.transmissions
    }

    /// Complete pending calls and hand back the packets still to be sent
    ///
    /// Must be called without holding the multiplexer lock: waiter callbacks run here.
    pub fn settle(self) -> Vec<Transmission> {
        for (completion, outcome) in self.settlements {
            completion.settle(outcome);
        }
        self.transmissions
    }
}

/// Correlates replies to in-flight requests and drives their retries
pub struct Multiplexer {
    policy: RetryPolicy,
    next_id: RequestId,
    requests: HashMap<RequestId, Request>,
    index: HashMap<OpKind, HashMap<String, RequestId>>,
}

impl Multiplexer {
    pub fn new(policy: RetryPolicy) -> Self {
        let index = OpKind::REPLIES
            .iter()
            .map(|&kind| (kind, HashMap::new()))
            .collect();
        Self {
            policy,
            next_id: 1,
            requests: HashMap::new(),
            index,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    // =========================================================================
    // Logical Operations
    // =========================================================================

    /// Fetch `key`, optionally from `bucket`
    ///
    /// Piggybacks on an in-flight get for the same key without sending anything.
    pub fn get(&mut self, key: &str, bucket: Option<Payload>) -> Result<(Call, Actions)> {
        if let Some(request) = self.indexed(OpKind::Value, key) {
            tracing::trace!(key = %key, "joining in-flight get");
            return Ok((request.attach(), Actions::default()));
        }
        let message = Message::new(OpKind::Request, key, bucket);
        self.submit(message, self.policy.get_timeout)
    }

    /// Store a new value; the reply carries the key the service assigned
    pub fn create(&mut self, payload: Option<Payload>) -> Result<(Call, Actions)> {
        let key = self.fresh_key(OpKind::Create);
        let message = Message::new(OpKind::Create, key, payload);
        self.submit(message, self.policy.default_timeout)
    }

    pub fn update(&mut self, key: &str, payload: Option<Payload>) -> Result<(Call, Actions)> {
        self.keyed(Message::new(OpKind::Update, key, payload))
    }

    pub fn delete(&mut self, key: &str) -> Result<(Call, Actions)> {
        self.keyed(Message::new(OpKind::Delete, key, None))
    }

    /// Ask the service to verify a signature; a `value` reply means it checked out
    pub fn check_signature(&mut self, record: CheckSig) -> Result<(Call, Actions)> {
        let key = self.fresh_key(OpKind::CheckSig);
        let message = Message::new(OpKind::CheckSig, key, Some(Payload::CheckSig(record)));
        self.submit(message, self.policy.default_timeout)
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Handle a raw inbound datagram
    pub fn on_datagram(&mut self, packet: &[u8]) -> (Dispatch, Actions) {
        match protocol::decode(packet) {
            Ok(message) => self.on_message(message),
            Err(e) => {
                tracing::debug!(len = packet.len(), "dropping malformed kvd packet: {}", e);
                (Dispatch::Malformed, Actions::default())
            }
        }
    }

    /// Handle a decoded inbound message
    pub fn on_message(&mut self, message: Message) -> (Dispatch, Actions) {
        if !message.op.is_reply() {
            tracing::debug!(op = %message.op, key = %message.key, "discarding non-reply kvd message");
            return (Dispatch::Discarded, Actions::default());
        }

        let id = match self.index.get(&message.op).and_then(|t| t.get(&message.key)) {
            Some(&id) => id,
            None => {
                tracing::warn!(op = %message.op, key = %message.key, "unsolicited kvd reply");
                return (Dispatch::Unsolicited, Actions::default());
            }
        };

        let Some(request) = self.remove(id) else {
            return (Dispatch::Unsolicited, Actions::default());
        };
        tracing::debug!(
            op = %message.op,
            key = %message.key,
            attempts = request.attempts(),
            "kvd request completed"
        );

        let payload = if message.op.carries_value() {
            message.payload
        } else {
            None
        };
        let reply = Reply {
            kind: message.op,
            key: message.key,
            payload,
        };
        let actions = Actions::settle_with(Arc::clone(request.completion()), Ok(reply));
        (Dispatch::Delivered, actions)
    }

    /// Handle an expired retry timer
    ///
    /// Timers of completed requests, or of superseded attempts, are no-ops.
    pub fn on_timeout(&mut self, id: RequestId, generation: u64) -> Actions {
        let Some(request) = self.requests.get_mut(&id) else {
            return Actions::default();
        };
        if request.generation() != generation {
            return Actions::default();
        }

        if request.can_retry() {
            tracing::debug!(
                op = %request.op(),
                key = %request.key(),
                attempt = request.attempts() + 1,
                timeout_ms = request.current_timeout().as_millis() as u64,
                "retrying kvd request"
            );
            return Actions::transmit(request.next_attempt());
        }

        let attempts = request.attempts();
        let Some(request) = self.remove(id) else {
            return Actions::default();
        };
        tracing::warn!(op = %request.op(), key = %request.key(), attempts, "kvd request timed out");
        Actions::settle_with(
            Arc::clone(request.completion()),
            Err(CallError::Timeout { attempts }),
        )
    }

    /// Abandon every in-flight request, failing its waiters
    pub fn shutdown(&mut self) -> Actions {
        let mut actions = Actions::default();
        for (_, request) in self.requests.drain() {
            actions
                .settlements
                .push((Arc::clone(request.completion()), Err(CallError::Shutdown)));
        }
        for table in self.index.values_mut() {
            table.clear();
        }
        actions
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Number of in-flight requests
    pub fn in_flight(&self) -> usize {
        self.requests.len()
    }

    /// Whether a request is indexed under (`kind`, `key`)
    pub fn is_indexed(&self, kind: OpKind, key: &str) -> bool {
        self.index.get(&kind).map_or(false, |t| t.contains_key(key))
    }

    /// Number of entries in the `kind` table
    pub fn index_len(&self, kind: OpKind) -> usize {
        self.index.get(&kind).map_or(0, HashMap::len)
    }

    /// In-flight request indexed under (`kind`, `key`)
    pub fn indexed(&self, kind: OpKind, key: &str) -> Option<&Request> {
        let id = self.index.get(&kind)?.get(key)?;
        self.requests.get(id)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Update and delete carry a caller key; an identical operation joins the
    /// in-flight one, a different one is refused.
    fn keyed(&mut self, message: Message) -> Result<(Call, Actions)> {
        let kind = message.op.expected_replies()[0];
        if let Some(existing) = self.indexed(kind, &message.key) {
            if existing.message() == &message {
                return Ok((existing.attach(), Actions::default()));
            }
            return Err(KvdError::InFlight {
                op: message.op,
                key: message.key,
            });
        }
        self.submit(message, self.policy.default_timeout)
    }

    fn submit(&mut self, message: Message, timeout: std::time::Duration) -> Result<(Call, Actions)> {
        let packet = protocol::encode(&message)?;

        let id = self.next_id;
        self.next_id += 1;

        let mut request = Request::new(
            id,
            message,
            packet,
            timeout,
            self.policy.max_retries,
            self.policy.max_backoff,
        );
        let call = request.attach();
        let transmission = request.next_attempt();

        for &kind in request.expected_replies() {
            self.index
                .entry(kind)
                .or_default()
                .insert(request.key().to_string(), id);
        }
        tracing::trace!(op = %request.op(), key = %request.key(), id, "kvd request created");
        self.requests.insert(id, request);

        Ok((call, Actions::transmit(transmission)))
    }

    /// Remove a request from the request map and every index table it is listed in
    fn remove(&mut self, id: RequestId) -> Option<Request> {
        let request = self.requests.remove(&id)?;
        for kind in request.expected_replies() {
            if let Some(table) = self.index.get_mut(kind) {
                if table.get(request.key()) == Some(&id) {
                    table.remove(request.key());
                }
            }
        }
        Some(request)
    }

    /// Mint a request key not already used by an in-flight request of this kind
    fn fresh_key(&self, op: OpKind) -> String {
        loop {
            let key = protocol::generate_request_key();
            if op
                .expected_replies()
                .iter()
                .all(|&kind| !self.is_indexed(kind, &key))
            {
                return key;
            }
        }
    }
}
