//! Engine callbacks bound to one session's transport and timer pair.

use std::io;
use std::time::Duration;

use crate::engine::{code, EngineIo};
use crate::timer::TimerPair;
use crate::transport::{is_timeout, DatagramTransport, HexPreview};

/// The [`EngineIo`] handed to the engine for the duration of one engine call.
///
/// Receives go through `scratch`, which is large enough for any datagram the
/// transport delivers. Only `min(datagram, engine buffer)` bytes are copied
/// out; the rest of an oversized datagram is dropped here.
pub(crate) struct SessionIo<'a> {
    transport: &'a mut dyn DatagramTransport,
    timer: &'a mut TimerPair,
    scratch: &'a mut [u8],
    last_fault: Option<io::Error>,
}

impl<'a> SessionIo<'a> {
    pub fn new(
        transport: &'a mut dyn DatagramTransport,
        timer: &'a mut TimerPair,
        scratch: &'a mut [u8],
    ) -> Self {
        SessionIo {
            transport,
            timer,
            scratch,
            last_fault: None,
        }
    }

    /// The last transport error seen during this engine call.
    pub fn take_fault(&mut self) -> Option<io::Error> {
        self.last_fault.take()
    }

    fn complete_receive(&mut self, result: io::Result<usize>, buf: &mut [u8]) -> i32 {
        match result {
            Ok(len) => {
                let n = len.min(buf.len());
                if len > buf.len() {
                    warn!("Truncated datagram of {} bytes to {}", len, buf.len());
                }
                buf[..n].copy_from_slice(&self.scratch[..n]);
                trace!("Received datagram, size = {}: {}", n, HexPreview(&buf[..n]));
                as_result(n)
            }
            Err(e) if is_timeout(&e) => {
                trace!("Receive timed out");
                code::RECEIVE_TIMEOUT
            }
            Err(e) => {
                debug!("Receive failed: {}", e);
                self.last_fault = Some(e);
                code::RECV_FAILED
            }
        }
    }
}

fn as_result(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

impl EngineIo for SessionIo<'_> {
    fn send(&mut self, buf: &[u8]) -> i32 {
        if i32::try_from(buf.len()).is_err() {
            return code::BAD_INPUT;
        }

        trace!("Sending datagram, size = {}: {}", buf.len(), HexPreview(buf));

        match self.transport.send(buf) {
            Ok(n) if n == buf.len() => as_result(n),
            Ok(n) => {
                warn!("Partial datagram send: {} of {} bytes", n, buf.len());
                code::SEND_FAILED
            }
            Err(e) => {
                debug!("Send failed: {}", e);
                self.last_fault = Some(e);
                code::SEND_FAILED
            }
        }
    }

    fn receive(&mut self, buf: &mut [u8]) -> i32 {
        let result = self.transport.recv(&mut self.scratch[..]);
        self.complete_receive(result, buf)
    }

    /// A `timeout_ms` of zero waits without bound.
    fn receive_timeout(&mut self, buf: &mut [u8], timeout_ms: u32) -> i32 {
        if timeout_ms == 0 {
            return self.receive(buf);
        }
        let timeout = Duration::from_millis(timeout_ms as u64);
        let result = self.transport.recv_timeout(&mut self.scratch[..], timeout);
        self.complete_receive(result, buf)
    }

    fn set_timer(&mut self, intermediate_ms: u32, final_ms: u32) {
        self.timer.arm(intermediate_ms, final_ms);
    }

    fn get_timer(&self) -> i32 {
        self.timer.poll().as_raw()
    }
}
