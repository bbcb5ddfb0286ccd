//! Datagram transport for light commands.

use std::net::{SocketAddr, UdpSocket};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("UDP send failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("command serialization failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Seam between the dispatcher and the wire. The production impl is UDP;
/// tests substitute a recording transport.
pub trait Transport {
    fn send(&self, addr: SocketAddr, payload: &[u8]) -> Result<(), TransportError>;
}

/// Fire-and-forget UDP sender. The socket is nonblocking so a send can
/// never stall the audio callback.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }
}

impl Transport for UdpTransport {
    fn send(&self, addr: SocketAddr, payload: &[u8]) -> Result<(), TransportError> {
        self.socket.send_to(payload, addr)?;
        Ok(())
    }
}
