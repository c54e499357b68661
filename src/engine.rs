//! Boundary with the handshake/record engine.
//!
//! The engine owns the DTLS state machine, key schedule, record protection and
//! anti-replay. This crate never looks inside it. What it does provide is the
//! environment the engine runs in:
//!
//! * [`EngineIo`] – the five callbacks the engine invokes while it is being driven
//!   (datagram send/receive and the retransmission timer pair).
//! * [`Engine`] – one engine handle, driven by the session's handshake, write and
//!   read calls. Dropping the box releases the handle.
//! * [`EngineFactory`] – creates handles and translates numeric result codes into
//!   messages.
//!
//! Results cross the boundary as plain integers, as with C engines: `>= 0` is
//! success (often a byte count), negative values are error codes. The well-known
//! codes in [`code`] use the same values as mbedtls so that an engine wrapping it
//! can pass its codes straight through.
//!
//! Every callback is invoked synchronously on the thread that called into the
//! engine, while the session holds its lock. Engines never see two concurrent
//! calls on one handle.

use crate::psk::PresharedKey;
use crate::Config;

/// Well-known result codes shared by the socket and engines.
pub mod code {
    /// Sending a datagram failed, or the transport accepted only part of it.
    pub const SEND_FAILED: i32 = -0x004E;

    /// Receiving a datagram failed.
    pub const RECV_FAILED: i32 = -0x004C;

    /// A bounded receive expired without a datagram.
    pub const RECEIVE_TIMEOUT: i32 = -0x6800;

    /// The entropy source is missing or failed.
    pub const ENTROPY_SOURCE_FAILED: i32 = -0x003C;

    /// The engine does not implement the requested feature.
    pub const FEATURE_UNAVAILABLE: i32 = -0x7080;

    /// Bad input parameters to a function.
    pub const BAD_INPUT: i32 = -0x7100;

    /// A record failed to parse or authenticate.
    pub const INVALID_RECORD: i32 = -0x7200;

    /// The peer used a PSK identity we do not know.
    pub const UNKNOWN_IDENTITY: i32 = -0x6C80;

    /// The handshake was aborted with a fatal alert.
    pub const FATAL_ALERT_MESSAGE: i32 = -0x7780;

    /// Short description of the codes defined in this module.
    ///
    /// Engines can use this as a fallback in their
    /// [`EngineFactory::error_message`](super::EngineFactory::error_message).
    pub fn describe(code: i32) -> Option<&'static str> {
        let s = match code {
            SEND_FAILED => "NET - Sending information through the socket failed",
            RECV_FAILED => "NET - Reading information from the socket failed",
            RECEIVE_TIMEOUT => "SSL - The operation timed out",
            ENTROPY_SOURCE_FAILED => "ENTROPY - Critical entropy source failure",
            FEATURE_UNAVAILABLE => "SSL - The requested feature is not available",
            BAD_INPUT => "SSL - Bad input parameters to function",
            INVALID_RECORD => "SSL - An invalid SSL record was received",
            UNKNOWN_IDENTITY => "SSL - Unknown identity received (eg, PSK identity)",
            FATAL_ALERT_MESSAGE => "SSL - A fatal alert message was received from our peer",
            _ => return None,
        };
        Some(s)
    }
}

/// Callbacks available to an engine while it is being driven.
///
/// Return conventions follow the engine contract: byte counts on success and
/// negative codes from [`code`] on failure.
pub trait EngineIo {
    /// Send one datagram to the peer. Returns `buf.len()` or a negative code.
    fn send(&mut self, buf: &[u8]) -> i32;

    /// Block until a datagram arrives and copy at most `buf.len()` bytes of it.
    ///
    /// Datagrams larger than `buf` are truncated and the excess is dropped.
    fn receive(&mut self, buf: &mut [u8]) -> i32;

    /// Like [`EngineIo::receive`], but gives up after `timeout_ms` and returns
    /// [`code::RECEIVE_TIMEOUT`].
    fn receive_timeout(&mut self, buf: &mut [u8], timeout_ms: u32) -> i32;

    /// Arm the retransmission timer pair. `final_ms == 0` cancels it.
    fn set_timer(&mut self, intermediate_ms: u32, final_ms: u32);

    /// `-1` no timer, `0` none elapsed, `1` intermediate elapsed, `2` both elapsed.
    fn get_timer(&self) -> i32;
}

/// Peer verification mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Do not verify the peer.
    None,
    /// Verify, but continue on failure.
    Optional,
    /// Verify and abort the handshake on failure.
    Required,
}

/// One engine handle.
///
/// The socket guarantees strictly sequential calls. Dropping the box releases
/// the handle and happens exactly once per handle.
pub trait Engine: Send {
    /// Configure PSK credentials. `0` on success.
    ///
    /// The engine copies what it needs; `psk` is wiped by the caller afterwards.
    fn set_preshared_key(&mut self, psk: &PresharedKey) -> i32;

    /// Expected server name for certificate based handshakes. `0` on success.
    fn set_hostname(&mut self, hostname: &str) -> i32 {
        let _ = hostname;
        code::FEATURE_UNAVAILABLE
    }

    /// Peer verification mode. `0` on success.
    fn set_auth_mode(&mut self, mode: AuthMode) -> i32 {
        let _ = mode;
        code::FEATURE_UNAVAILABLE
    }

    /// Run the handshake to completion. `0` on success.
    ///
    /// The engine drives retransmission purely through the timer callbacks.
    fn handshake(&mut self, io: &mut dyn EngineIo) -> i32;

    /// Protect and send application data.
    ///
    /// Returns how many bytes of `buf` were consumed (at least one record's
    /// worth when `buf` is non-empty), or a negative code.
    fn write(&mut self, io: &mut dyn EngineIo, buf: &[u8]) -> i32;

    /// Receive one application-data record into `buf`.
    ///
    /// Blocks until a record arrives. Returns the number of bytes written. A
    /// record larger than `buf` fills it and the rest of that record is dropped;
    /// it is never returned by a later call.
    fn read(&mut self, io: &mut dyn EngineIo, buf: &mut [u8]) -> i32;
}

/// Creates engine handles.
pub trait EngineFactory: Send + Sync {
    /// Create a new engine handle for one session.
    fn create(&self, config: &Config) -> Result<Box<dyn Engine>, i32>;

    /// Human readable text for a result code.
    fn error_message(&self, code: i32) -> String {
        code::describe(code)
            .map(str::to_string)
            .unwrap_or_else(|| format!("UNKNOWN ERROR CODE ({:04X})", code.unsigned_abs()))
    }
}
