use std::fmt;
use std::io;

use thiserror::Error;

use crate::engine::code;
use crate::transport;
use crate::SessionState;

/// A failure code reported by the engine, with its translated message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFault {
    pub code: i32,
    pub message: String,
}

impl fmt::Display for EngineFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (-0x{:04X})", self.message, self.code.unsigned_abs())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Transport fault: {0}")]
    Transport(#[from] io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Engine could not be created: {0}")]
    EngineSetup(EngineFault),

    #[error("Crypto configuration rejected: {0}")]
    CryptoConfig(EngineFault),

    #[error("Handshake failed: {0}")]
    Handshake(EngineFault),

    #[error("Record layer failure: {0}")]
    Protocol(EngineFault),

    #[error("Received record does not fit read capacity {capacity}")]
    RecordTooLarge { capacity: usize },

    #[error("{op} is not valid in state {state:?}")]
    State {
        op: &'static str,
        state: SessionState,
    },

    #[error("Session lock poisoned by a panic in a previous engine call")]
    Poisoned,
}

impl Error {
    /// The engine result code, for errors that carry one.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::EngineSetup(f)
            | Error::CryptoConfig(f)
            | Error::Handshake(f)
            | Error::Protocol(f) => Some(f.code),
            _ => None,
        }
    }

    /// True if the error is a bounded receive running out, either from the
    /// engine or straight from the transport.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Transport(e) => transport::is_timeout(e),
            _ => self.code() == Some(code::RECEIVE_TIMEOUT),
        }
    }
}
