//! Blocking DTLS session socket over unreliable datagram transports.
//!
//! This crate is the glue between a caller that wants a simple socket
//! (`handshake`, `write`, `read`) and a DTLS engine that is event driven and
//! knows nothing about sockets or clocks. The engine (cryptography, record
//! framing, anti-replay and the retransmission backoff) is supplied through the
//! [`Engine`] and [`EngineFactory`] traits. This crate provides what the engine
//! needs around it:
//!
//! * datagram send/receive over a connected transport ([`UdpTransport`],
//!   [`MemoryTransport`], or any [`DatagramTransport`]),
//! * the two-deadline retransmission timer pair ([`TimerPair`]) behind the
//!   engine's `set_timer`/`get_timer` callbacks,
//! * a process-wide [`entropy`] source,
//! * a session lifecycle with serialized engine access and exactly-once release
//!   of the engine handle ([`DtlsSocket`]).
//!
//! # Example
//!
//! ```no_run
//! use std::net::UdpSocket;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use dtls_socket::{Config, DtlsSocket, EngineFactory, UdpTransport};
//!
//! fn talk(factory: Arc<dyn EngineFactory>) -> Result<(), dtls_socket::Error> {
//!     let socket = UdpSocket::bind("0.0.0.0:0")?;
//!     let mut transport = UdpTransport::connect(socket, "192.0.2.10:5684".parse().unwrap())?;
//!     transport.set_read_timeout(Some(Duration::from_secs(5)))?;
//!
//!     let dtls = DtlsSocket::new(factory, transport, Arc::new(Config::default()))?;
//!     dtls.configure_preshared_key(&[0x01, 0x02, 0x03, 0x04], b"client1")?;
//!     dtls.handshake()?;
//!
//!     dtls.write(b"hello")?;
//!     let reply = dtls.read()?;
//!     println!("{} bytes back", reply.len());
//!
//!     dtls.close();
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]

#[macro_use]
extern crate log;

mod bio;
mod config;
pub mod engine;
pub mod entropy;
mod error;
mod psk;
mod rng;
mod socket;
mod timer;
pub mod transport;

pub use config::{Config, ConfigBuilder, OversizedRecord, Role, MAX_PLAINTEXT_LEN};
pub use engine::{AuthMode, Engine, EngineFactory, EngineIo};
pub use error::{EngineFault, Error};
pub use psk::PresharedKey;
pub use rng::SeededRng;
pub use socket::{DtlsSocket, SessionState};
pub use timer::{TimerPair, TimerState};
pub use transport::{DatagramTransport, MemoryTransport, UdpTransport};
