//! One-shot completion shared by every waiter of a request
//!
//! A `Completion` settles exactly once. Callbacks run in attachment order with
//! the same outcome; a callback attached after settling runs immediately on
//! the attaching thread.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{CallError, Result};
use crate::protocol::{OpKind, Payload};

/// Successful reply to a logical call
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Reply kind that completed the call
    pub kind: OpKind,

    /// Key the reply was addressed to
    pub key: String,

    /// Value, only ever present for `value` and `created`
    pub payload: Option<Payload>,
}

impl Reply {
    /// `value` reply: the key exists (for checksig, the signature verified)
    pub fn is_found(&self) -> bool {
        self.kind == OpKind::Value
    }
}

/// Terminal outcome broadcast to all waiters
pub type Outcome = std::result::Result<Reply, CallError>;

type Callback = Box<dyn FnOnce(&Outcome) + Send>;

struct State {
    outcome: Option<Outcome>,
    callbacks: Vec<Callback>,
    /// Callbacks are still being run by the settling thread
    draining: bool,
}

pub struct Completion {
    state: Mutex<State>,
    settled: Condvar,
}

impl Completion {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                outcome: None,
                callbacks: Vec::new(),
                draining: false,
            }),
            settled: Condvar::new(),
        })
    }

    /// Settle with `outcome`; returns false if already settled
    pub fn settle(&self, outcome: Outcome) -> bool {
        let mut state = self.state.lock();
        if state.outcome.is_some() {
            return false;
        }
        state.outcome = Some(outcome.clone());
        state.draining = true;
        self.settled.notify_all();

        loop {
            let batch = std::mem::take(&mut state.callbacks);
            if batch.is_empty() {
                state.draining = false;
                return true;
            }
            drop(state);
            for callback in batch {
                callback(&outcome);
            }
            state = self.state.lock();
        }
    }

    pub fn is_settled(&self) -> bool {
        self.state.lock().outcome.is_some()
    }

    fn on_settle(&self, callback: Callback) {
        let mut state = self.state.lock();
        if state.draining || state.outcome.is_none() {
            state.callbacks.push(callback);
            return;
        }
        let outcome = state.outcome.clone();
        drop(state);
        if let Some(outcome) = outcome {
            callback(&outcome);
        }
    }

    fn outcome(&self) -> Option<Outcome> {
        self.state.lock().outcome.clone()
    }

    fn wait(&self) -> Outcome {
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            self.settled.wait(&mut state);
        }
    }

    fn wait_until(&self, deadline: Instant) -> Option<Outcome> {
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return Some(outcome.clone());
            }
            if self.settled.wait_until(&mut state, deadline).timed_out() {
                return state.outcome.clone();
            }
        }
    }
}

/// Handle to one caller's pending call
#[derive(Clone)]
pub struct Call {
    completion: Arc<Completion>,
}

impl Call {
    pub(crate) fn new(completion: Arc<Completion>) -> Self {
        Self { completion }
    }

    /// Block until the call completes
    pub fn wait(&self) -> Result<Reply> {
        Ok(self.completion.wait()?)
    }

    /// Block for at most `timeout`; `None` if still pending
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Reply>> {
        self.completion
            .wait_until(Instant::now() + timeout)
            .map(|outcome| outcome.map_err(Into::into))
    }

    /// The outcome, if already known
    pub fn try_outcome(&self) -> Option<Outcome> {
        self.completion.outcome()
    }

    pub fn is_complete(&self) -> bool {
        self.completion.is_settled()
    }

    /// Run `callback` once the call completes (immediately if it already has)
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&Outcome) + Send + 'static,
    {
        self.completion.on_settle(Box::new(callback));
    }
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("complete", &self.is_complete())
            .finish()
    }
}
