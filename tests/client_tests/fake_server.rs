//! Minimal KVD server stand-in bound to localhost

use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use kvd_client::protocol::{decode, encode, Message, OpKind, Payload};
use kvd_client::ClientConfig;

pub struct FakeServer {
    socket: UdpSocket,
}

impl FakeServer {
    pub fn bind() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        Self { socket }
    }

    pub fn port(&self) -> u16 {
        self.socket.local_addr().unwrap().port()
    }

    /// Config for a client talking to this server
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::builder()
            .remote_address("127.0.0.1")
            .remote_port(self.port())
            .bind_address("127.0.0.1:0")
            .recv_poll_ms(20)
            .build()
            .unwrap()
    }

    /// Wait for the next request
    pub fn recv(&self) -> (Message, SocketAddr) {
        let mut buf = [0u8; 2048];
        let (len, from) = self.socket.recv_from(&mut buf).unwrap();
        (decode(&buf[..len]).unwrap(), from)
    }

    /// Wait at most `timeout` for a request
    pub fn try_recv(&self, timeout: Duration) -> Option<(Message, SocketAddr)> {
        self.socket.set_read_timeout(Some(timeout)).unwrap();
        let mut buf = [0u8; 2048];
        let received = self.socket.recv_from(&mut buf).ok();
        self.socket.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        received.map(|(len, from)| (decode(&buf[..len]).unwrap(), from))
    }

    pub fn reply(&self, to: SocketAddr, op: OpKind, key: &str, payload: Option<Payload>) {
        let packet = encode(&Message::new(op, key, payload)).unwrap();
        self.send_raw(to, &packet);
    }

    pub fn send_raw(&self, to: SocketAddr, packet: &[u8]) {
        self.socket.send_to(packet, to).unwrap();
    }
}
