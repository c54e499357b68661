use crate::Error;

/// Which side of the handshake the engine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Client,
    Server,
}

/// What [`DtlsSocket::read`](crate::DtlsSocket::read) does with a record larger
/// than [`Config::max_record_size`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OversizedRecord {
    /// Fail the read with [`Error::RecordTooLarge`]. The session stays usable.
    #[default]
    Fail,
    /// Return the first `max_record_size` bytes and drop the rest.
    Truncate,
}

/// Largest application-data payload of a single DTLS record.
pub const MAX_PLAINTEXT_LEN: usize = 16 * 1024;

/// Session configuration
#[derive(Debug, Clone)]
pub struct Config {
    role: Role,
    max_record_size: usize,
    oversized_record: OversizedRecord,
    max_datagram_size: usize,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            role: Role::Client,
            max_record_size: MAX_PLAINTEXT_LEN,
            oversized_record: OversizedRecord::Fail,
            max_datagram_size: 65_535,
        }
    }

    /// Handshake role handed to the engine.
    #[inline(always)]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Capacity of the buffer a single `read()` receives into.
    #[inline(always)]
    pub fn max_record_size(&self) -> usize {
        self.max_record_size
    }

    /// Policy for records that do not fit `max_record_size`.
    #[inline(always)]
    pub fn oversized_record(&self) -> OversizedRecord {
        self.oversized_record
    }

    /// Largest datagram the transport adapter receives without truncating.
    ///
    /// The engine may still ask for less; the smaller of the two wins.
    #[inline(always)]
    pub fn max_datagram_size(&self) -> usize {
        self.max_datagram_size
    }
}

/// Builder for session configuration.
#[derive(Debug)]
pub struct ConfigBuilder {
    role: Role,
    max_record_size: usize,
    oversized_record: OversizedRecord,
    max_datagram_size: usize,
}

impl ConfigBuilder {
    /// Set the handshake role.
    ///
    /// Defaults to [`Role::Client`].
    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Set the read buffer capacity.
    ///
    /// Defaults to 16 KiB.
    pub fn max_record_size(mut self, size: usize) -> Self {
        self.max_record_size = size;
        self
    }

    /// Set the policy for oversized records.
    ///
    /// Defaults to [`OversizedRecord::Fail`].
    pub fn oversized_record(mut self, policy: OversizedRecord) -> Self {
        self.oversized_record = policy;
        self
    }

    /// Set the largest datagram accepted from the transport.
    ///
    /// Defaults to 65535.
    pub fn max_datagram_size(mut self, size: usize) -> Self {
        self.max_datagram_size = size;
        self
    }

    /// Build the configuration.
    ///
    /// Returns `Error::Config` if a size is zero.
    pub fn build(self) -> Result<Config, Error> {
        if self.max_record_size == 0 {
            return Err(Error::Config("max_record_size must be non-zero".into()));
        }
        if self.max_datagram_size == 0 {
            return Err(Error::Config("max_datagram_size must be non-zero".into()));
        }

        Ok(self.into_config())
    }

    fn into_config(self) -> Config {
        Config {
            role: self.role,
            max_record_size: self.max_record_size,
            oversized_record: self.oversized_record,
            max_datagram_size: self.max_datagram_size,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().into_config()
    }
}
