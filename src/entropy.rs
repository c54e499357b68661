//! Process-wide entropy provider.
//!
//! Engines draw random bytes (hello randoms, nonces, cookies) through [`fill`].
//! The source is installed once per process, before the first session is created,
//! and never replaced afterwards. [`DtlsSocket::new`](crate::DtlsSocket::new) installs
//! [`OsEntropy`] if the application did not install its own source first.

use std::fmt::Debug;

use once_cell::sync::OnceCell;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::engine::code;

/// Cryptographically secure random byte source.
pub trait EntropySource: Send + Sync + Debug {
    /// Fill buffer with cryptographically secure random bytes.
    fn fill(&self, buf: &mut [u8]) -> Result<(), String>;
}

/// Entropy from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, buf: &mut [u8]) -> Result<(), String> {
        OsRng.try_fill_bytes(buf).map_err(|e| e.to_string())
    }
}

static SOURCE: OnceCell<Box<dyn EntropySource>> = OnceCell::new();

/// Install the process-wide entropy source.
///
/// Only the first call has an effect. Returns `true` if `source` was installed,
/// `false` if a source was already in place (the argument is dropped).
pub fn initialize(source: Box<dyn EntropySource>) -> bool {
    let mut installed = false;
    SOURCE.get_or_init(|| {
        installed = true;
        source
    });
    if installed {
        debug!("Entropy source installed: {:?}", SOURCE.get());
    }
    installed
}

/// Install [`OsEntropy`] unless a source is already installed.
pub fn ensure_initialized() {
    SOURCE.get_or_init(|| {
        debug!("Entropy source installed: OsEntropy");
        Box::new(OsEntropy)
    });
}

/// Whether a source has been installed.
pub fn is_initialized() -> bool {
    SOURCE.get().is_some()
}

/// Fill `buf` from the installed source.
///
/// Returns `0` on success, [`code::ENTROPY_SOURCE_FAILED`] if no source is
/// installed or the source failed.
pub fn fill(buf: &mut [u8]) -> i32 {
    let Some(source) = SOURCE.get() else {
        warn!("Entropy requested before initialization");
        return code::ENTROPY_SOURCE_FAILED;
    };

    match source.fill(buf) {
        Ok(()) => 0,
        Err(e) => {
            warn!("Entropy source failed: {}", e);
            code::ENTROPY_SOURCE_FAILED
        }
    }
}
