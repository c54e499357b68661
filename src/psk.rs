use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Pre-shared key credential: the symmetric key and the identity sent to the peer.
///
/// Both are wiped from memory when the value is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PresharedKey {
    key: Vec<u8>,
    identity: Vec<u8>,
}

impl PresharedKey {
    pub fn new(key: &[u8], identity: &[u8]) -> Self {
        Self {
            key: key.to_vec(),
            identity: identity.to_vec(),
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn identity(&self) -> &[u8] {
        &self.identity
    }
}

impl fmt::Debug for PresharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresharedKey")
            .field("key", &format_args!("[{} bytes]", self.key.len()))
            .field("identity", &String::from_utf8_lossy(&self.identity))
            .finish()
    }
}
