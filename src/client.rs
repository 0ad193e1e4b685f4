//! KVD Client
//!
//! Wires the multiplexer to a datagram socket and a timer thread.
//!
//! ## Threads
//! - Caller threads: submit operations, get a `Call` back immediately
//! - `kvd-recv`: reads datagrams and dispatches replies
//! - `kvd-timer`: fires retry timers
//!
//! All three only touch request state through the multiplexer lock, and
//! waiter callbacks always run after that lock is released.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::config::ClientConfig;
use crate::error::{CallError, KvdError, Result};
use crate::mux::{Actions, Call, Dispatch, Multiplexer, RequestId, Transmission};
use crate::network::{TimerHandle, TimerService, Transport, UdpTransport, MAX_DATAGRAM_SIZE};
use crate::protocol::{CheckSig, OpKind, Payload, SigType};

/// State shared between the client handle and its threads
struct Shared {
    mux: Mutex<Multiplexer>,
    transport: Arc<dyn Transport>,
    remote: SocketAddr,
    timers: TimerHandle,
    closed: AtomicBool,
}

impl Shared {
    /// Carry out a multiplexer step (called without the lock held)
    fn execute(&self, actions: Actions) {
        for transmission in actions.settle() {
            self.transmit(transmission);
        }
    }

    fn transmit(&self, transmission: Transmission) {
        match self.transport.send_to(&transmission.packet, self.remote) {
            Ok(()) => tracing::trace!(
                request = transmission.request,
                attempt = transmission.generation,
                len = transmission.packet.len(),
                "sent kvd packet"
            ),
            // Treated like a lost datagram: the retry timer still runs
            Err(e) => tracing::warn!(
                request = transmission.request,
                remote = %self.remote,
                "kvd send failed: {}",
                e
            ),
        }
        self.timers
            .arm(transmission.request, transmission.generation, transmission.timeout);
    }

    fn on_datagram(&self, packet: &[u8]) -> Dispatch {
        let (dispatch, actions) = self.mux.lock().on_datagram(packet);
        self.execute(actions);
        dispatch
    }

    fn on_timeout(&self, request: RequestId, generation: u64) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let actions = self.mux.lock().on_timeout(request, generation);
        self.execute(actions);
    }

    fn submit<F>(&self, op: F) -> Result<Call>
    where
        F: FnOnce(&mut Multiplexer) -> Result<(Call, Actions)>,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(CallError::Shutdown.into());
        }
        let submitted = {
            let mut mux = self.mux.lock();
            op(&mut *mux)
        };
        let (call, actions) = submitted?;
        self.execute(actions);
        Ok(call)
    }
}

/// Client for a KVD service
///
/// Every operation returns as soon as its first packet is sent; the returned
/// `Call` completes once a reply arrives or the retry budget runs out.
pub struct KvdClient {
    shared: Arc<Shared>,
    timers: TimerService,
    receiver: Option<JoinHandle<()>>,
}

impl KvdClient {
    /// Bind a UDP socket and start the client
    pub fn connect(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let poll = Duration::from_millis(config.recv_poll_ms);
        let transport = UdpTransport::bind(&config.bind_address, poll)?;
        tracing::debug!(local = %transport.local_addr()?, "kvd socket bound");
        Self::with_transport(config, Arc::new(transport))
    }

    /// Start the client over an existing transport
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let remote = resolve(&config.remote_address, config.remote_port)?;

        let mut timers = TimerService::new();
        let shared = Arc::new(Shared {
            mux: Mutex::new(Multiplexer::new(config.retry_policy())),
            transport,
            remote,
            timers: timers.handle(),
            closed: AtomicBool::new(false),
        });

        let on_expire: Weak<Shared> = Arc::downgrade(&shared);
        timers.start(move |request, generation| {
            if let Some(shared) = on_expire.upgrade() {
                shared.on_timeout(request, generation);
            }
        })?;

        let receiving = Arc::clone(&shared);
        let receiver = thread::Builder::new()
            .name("kvd-recv".to_string())
            .spawn(move || receive_loop(receiving))?;

        tracing::info!(remote = %remote, "kvd client started");
        Ok(Self {
            shared,
            timers,
            receiver: Some(receiver),
        })
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Fetch the value stored under `key`
    ///
    /// A `novalue` reply completes the call successfully with no payload.
    pub fn get(&self, key: &str) -> Result<Call> {
        self.shared.submit(|mux| mux.get(key, None))
    }

    /// Fetch `key` from a named bucket
    pub fn get_in_bucket(&self, key: &str, bucket: impl Into<Payload>) -> Result<Call> {
        let bucket = bucket.into();
        self.shared.submit(|mux| mux.get(key, Some(bucket)))
    }

    /// Store a new value; the `created` reply carries the assigned key
    pub fn create(&self, payload: impl Into<Payload>) -> Result<Call> {
        let payload = payload.into();
        self.shared.submit(|mux| mux.create(Some(payload)))
    }

    pub fn update(&self, key: &str, payload: impl Into<Payload>) -> Result<Call> {
        let payload = payload.into();
        self.shared.submit(|mux| mux.update(key, Some(payload)))
    }

    pub fn delete(&self, key: &str) -> Result<Call> {
        self.shared.submit(|mux| mux.delete(key))
    }

    /// Ask the service to verify `signature` over `data` for `subject_id`
    ///
    /// The reply's `is_found()` tells whether the signature was accepted.
    pub fn check_signature(
        &self,
        sig_type: SigType,
        subject_id: &str,
        signature: impl Into<Bytes>,
        data: impl Into<Bytes>,
    ) -> Result<Call> {
        let record = CheckSig::new(sig_type, subject_id, signature, data);
        self.shared.submit(|mux| mux.check_signature(record))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stop the client; in-flight calls fail with `CallError::Shutdown`
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let actions = self.shared.mux.lock().shutdown();
        self.shared.execute(actions);
        self.timers.shutdown();
        if let Some(receiver) = self.receiver.take() {
            // A waiter callback on the receive thread may drop the client; that
            // thread sees the closed flag and exits on its own
            if receiver.thread().id() != thread::current().id() && receiver.join().is_err() {
                tracing::warn!("kvd receive thread panicked");
            }
        }
        tracing::info!(remote = %self.shared.remote, "kvd client stopped");
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn remote_addr(&self) -> SocketAddr {
        self.shared.remote
    }

    /// Number of logical requests awaiting a reply
    pub fn in_flight(&self) -> usize {
        self.shared.mux.lock().in_flight()
    }

    /// Whether a request is waiting for a `kind` reply on `key`
    pub fn is_pending(&self, kind: OpKind, key: &str) -> bool {
        self.shared.mux.lock().is_indexed(kind, key)
    }
}

impl Drop for KvdClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Read datagrams until the client closes; errors never end the loop
fn receive_loop(shared: Arc<Shared>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    while !shared.closed.load(Ordering::Acquire) {
        match shared.transport.recv_from(&mut buf) {
            Ok(Some((len, from))) => {
                let dispatch = shared.on_datagram(&buf[..len]);
                tracing::trace!(from = %from, len, ?dispatch, "kvd datagram received");
            }
            Ok(None) => {}
            Err(e) => {
                if shared.closed.load(Ordering::Acquire) {
                    break;
                }
                tracing::debug!("kvd receive error: {}", e);
            }
        }
    }
}

/// Resolve the service address, preferring IPv4 to match the default bind address
fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| KvdError::Config(format!("cannot resolve '{}': {}", host, e)))?
        .collect();
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| KvdError::Config(format!("'{}' resolved to no addresses", host)))
}
