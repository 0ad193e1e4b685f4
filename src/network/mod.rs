//! Network Module
//!
//! Datagram transport and retry timers.
//!
//! ## Architecture
//! - One UDP socket per client, shared by sender and receive thread
//! - One timer thread per client, fed over a channel
//! - Both report into the client's multiplexer

mod transport;
mod timer;

pub use transport::{Transport, UdpTransport, MAX_DATAGRAM_SIZE};
pub use timer::{TimerHandle, TimerService};
