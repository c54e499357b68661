use std::io;
use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use super::{DatagramTransport, HexPreview};
use crate::rng::SeededRng;

/// One end of an in-process datagram link.
///
/// Created in pairs with [`MemoryTransport::pair`]. Datagrams keep their
/// boundaries and arrive in order, unless loss is configured with
/// [`MemoryTransport::with_loss`], in which case each sent datagram is
/// independently dropped with the given probability.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    loss_rate: f64,
    rng: SeededRng,
    read_timeout: Option<Duration>,
    sent: u64,
    dropped: u64,
}

impl MemoryTransport {
    /// Two connected ends. What one sends, the other receives.
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let (tx_a, rx_b) = mpsc::channel();
        let (tx_b, rx_a) = mpsc::channel();
        (Self::new(tx_a, rx_a), Self::new(tx_b, rx_b))
    }

    fn new(tx: Sender<Vec<u8>>, rx: Receiver<Vec<u8>>) -> Self {
        MemoryTransport {
            tx,
            rx,
            loss_rate: 0.0,
            rng: SeededRng::new(None),
            read_timeout: None,
            sent: 0,
            dropped: 0,
        }
    }

    /// Drop outgoing datagrams with probability `rate`.
    ///
    /// With a `seed` the loss pattern is the same for every run.
    pub fn with_loss(mut self, rate: f64, seed: Option<u64>) -> Self {
        self.loss_rate = rate;
        self.rng = SeededRng::new(seed);
        self
    }

    /// Bound every blocking receive by `timeout`.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    /// Datagrams handed to `send`, including dropped ones.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Datagrams lost to simulated loss.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn deliver(datagram: Vec<u8>, buf: &mut [u8]) -> usize {
        let n = datagram.len().min(buf.len());
        buf[..n].copy_from_slice(&datagram[..n]);
        n
    }
}

fn disconnected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "peer end dropped")
}

impl DatagramTransport for MemoryTransport {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sent += 1;

        if self.rng.chance(self.loss_rate) {
            self.dropped += 1;
            trace!("Simulated loss of {} bytes: {}", buf.len(), HexPreview(buf));
            // Lost on the wire, the sender cannot tell.
            return Ok(buf.len());
        }

        self.tx.send(buf.to_vec()).map_err(|_| disconnected())?;
        Ok(buf.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.read_timeout {
            Some(t) => self.recv_timeout(buf, t),
            None => {
                let datagram = self.rx.recv().map_err(|_| disconnected())?;
                Ok(Self::deliver(datagram, buf))
            }
        }
    }

    fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        match self.rx.recv_timeout(timeout) {
            Ok(datagram) => Ok(Self::deliver(datagram, buf)),
            Err(RecvTimeoutError::Timeout) => Err(io::ErrorKind::TimedOut.into()),
            Err(RecvTimeoutError::Disconnected) => Err(disconnected()),
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}
