//! Retry Timer Thread
//!
//! A single thread keeps a deadline heap for every armed retry timer and
//! reports expiries as `(request, generation)`. Timers are never removed
//! early; the multiplexer ignores expiries that no longer match a live attempt.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::mux::RequestId;

enum TimerCommand {
    Arm {
        deadline: Instant,
        request: RequestId,
        generation: u64,
    },
    Shutdown,
}

/// Cheap handle for arming timers
#[derive(Clone)]
pub struct TimerHandle {
    commands: Sender<TimerCommand>,
}

impl TimerHandle {
    /// Fire `(request, generation)` after `after`
    pub fn arm(&self, request: RequestId, generation: u64, after: Duration) {
        let command = TimerCommand::Arm {
            deadline: Instant::now() + after,
            request,
            generation,
        };
        if self.commands.send(command).is_err() {
            tracing::debug!(request, "timer thread gone, dropping timer");
        }
    }
}

/// Owns the timer thread
///
/// Timers armed before `start` are buffered and fire once the thread runs.
pub struct TimerService {
    handle: TimerHandle,
    commands: Option<Receiver<TimerCommand>>,
    thread: Option<JoinHandle<()>>,
}

impl TimerService {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            handle: TimerHandle { commands: tx },
            commands: Some(rx),
            thread: None,
        }
    }

    /// Start the timer thread; `on_expire` runs on that thread
    pub fn start<F>(&mut self, on_expire: F) -> io::Result<()>
    where
        F: Fn(RequestId, u64) + Send + 'static,
    {
        let Some(commands) = self.commands.take() else {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "timer thread already started",
            ));
        };
        let thread = thread::Builder::new()
            .name("kvd-timer".to_string())
            .spawn(move || run(commands, on_expire))?;
        self.thread = Some(thread);
        Ok(())
    }

    pub fn handle(&self) -> TimerHandle {
        self.handle.clone()
    }

    /// Stop the thread; pending timers are discarded
    ///
    /// Called from the timer thread itself (inside `on_expire`), the thread
    /// is signalled but not joined.
    pub fn shutdown(&mut self) {
        let _ = self.handle.commands.send(TimerCommand::Shutdown);
        if let Some(worker) = self.thread.take() {
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                tracing::warn!("kvd timer thread panicked");
            }
        }
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<F>(commands: Receiver<TimerCommand>, on_expire: F)
where
    F: Fn(RequestId, u64),
{
    let mut pending: BinaryHeap<Reverse<(Instant, RequestId, u64)>> = BinaryHeap::new();

    loop {
        let next = match pending.peek() {
            Some(Reverse((deadline, _, _))) => match commands.recv_deadline(*deadline) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => return,
            },
            None => match commands.recv() {
                Ok(command) => Some(command),
                Err(_) => return,
            },
        };

        match next {
            Some(TimerCommand::Arm {
                deadline,
                request,
                generation,
            }) => pending.push(Reverse((deadline, request, generation))),
            Some(TimerCommand::Shutdown) => return,
            None => {}
        }

        let now = Instant::now();
        while let Some(&Reverse((deadline, request, generation))) = pending.peek() {
            if deadline > now {
                break;
            }
            pending.pop();
            on_expire(request, generation);
        }
    }
}
