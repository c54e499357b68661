//! Datagram transports.
//!
//! A transport is connected to exactly one peer for its whole life. DTLS is
//! connection oriented at this layer even though UDP is not: every datagram sent
//! goes to the configured peer, and only datagrams from that peer are received.
//!
//! Transports do not retry, reorder or reassemble. Lost datagrams are left to the
//! engine's retransmission.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

mod memory;
mod udp;

pub use memory::MemoryTransport;
pub use udp::UdpTransport;

/// Connected, single-peer, unreliable datagram transport.
pub trait DatagramTransport: Send {
    /// Send one datagram to the peer.
    ///
    /// Returns the number of bytes the transport accepted. Anything other than
    /// `buf.len()` is treated as a fault by the caller.
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Block until one datagram arrives and copy it into `buf`.
    ///
    /// A datagram longer than `buf` is truncated. Blocks forever unless the
    /// transport has its own read timeout configured, in which case an expired
    /// wait is an error of kind `TimedOut` or `WouldBlock`.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Like [`DatagramTransport::recv`] but waits at most `timeout`.
    fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Address of the peer, if the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr>;
}

impl<T: DatagramTransport + ?Sized> DatagramTransport for Box<T> {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).send(buf)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).recv(buf)
    }

    fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        (**self).recv_timeout(buf, timeout)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        (**self).peer_addr()
    }
}

/// True for the error kinds a bounded receive reports on expiry.
pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

/// Hex preview of a datagram for trace logging.
pub(crate) struct HexPreview<'a>(pub &'a [u8]);

impl fmt::Display for HexPreview<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MAX: usize = 32;
        for (i, b) in self.0.iter().take(MAX).enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02x}", b)?;
        }
        if self.0.len() > MAX {
            write!(f, " ..(+{})", self.0.len() - MAX)?;
        }
        Ok(())
    }
}
