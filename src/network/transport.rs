//! Datagram Transport
//!
//! The client only needs to send opaque packets to one address and to read
//! whatever arrives on its socket.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// Largest datagram the receive loop accepts
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// Unreliable datagram channel
pub trait Transport: Send + Sync + 'static {
    /// Send one datagram to `dest`
    fn send_to(&self, packet: &[u8], dest: SocketAddr) -> io::Result<()>;

    /// Receive one datagram, waiting at most the transport's poll interval
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;
}

/// UDP socket transport
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind a socket; receives wake every `poll` so the caller can observe shutdown
    pub fn bind(addr: &str, poll: Duration) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(poll))?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    fn send_to(&self, packet: &[u8], dest: SocketAddr) -> io::Result<()> {
        let sent = self.socket.send_to(packet, dest)?;
        if sent != packet.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short datagram write: {} of {} bytes", sent, packet.len()),
            ));
        }
        Ok(())
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            // Unix reports an expired read timeout as WouldBlock, Windows as TimedOut
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
