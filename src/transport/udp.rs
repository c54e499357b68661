use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use super::DatagramTransport;

/// A UDP socket connected to a single peer.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
    read_timeout: Option<Duration>,
}

impl UdpTransport {
    /// Connect an existing socket to `peer`.
    ///
    /// After this the OS filters out datagrams from any other address.
    pub fn connect(socket: UdpSocket, peer: SocketAddr) -> io::Result<Self> {
        socket.connect(peer)?;
        let read_timeout = socket.read_timeout()?;
        debug!("UDP transport connected to {}", peer);
        Ok(Self {
            socket,
            peer,
            read_timeout,
        })
    }

    /// Bind a new socket to `local` and connect it to `peer`.
    pub fn bind(local: impl ToSocketAddrs, peer: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(local)?;
        Self::connect(socket, peer)
    }

    /// Bound every blocking receive by `timeout`. `None` blocks forever.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(timeout.map(clamp_timeout))?;
        self.read_timeout = timeout;
        Ok(())
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Get a reference to the underlying socket.
    pub fn inner(&self) -> &UdpSocket {
        &self.socket
    }
}

// A zero timeout is rejected by the OS.
fn clamp_timeout(t: Duration) -> Duration {
    t.max(Duration::from_millis(1))
}

impl DatagramTransport for UdpTransport {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf)
    }

    fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.socket.set_read_timeout(Some(clamp_timeout(timeout)))?;
        let result = self.socket.recv(buf);
        // A received datagram must not be lost to a failed restore.
        if let Err(e) = self
            .socket
            .set_read_timeout(self.read_timeout.map(clamp_timeout))
        {
            warn!("Failed to restore UDP read timeout: {}", e);
        }
        result
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }
}
