use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::bio::SessionIo;
use crate::engine::{code, AuthMode, Engine, EngineFactory};
use crate::error::EngineFault;
use crate::psk::PresharedKey;
use crate::timer::TimerPair;
use crate::transport::DatagramTransport;
use crate::{entropy, Config, Error, OversizedRecord};

/// Lifecycle of a [`DtlsSocket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Engine created, nothing configured.
    Created,
    /// Credentials accepted by the engine.
    KeyConfigured,
    /// Inside `handshake()`.
    Handshaking,
    /// Handshake completed, application data can flow.
    Established,
    /// The engine reported an unrecoverable error.
    Faulted,
    /// The engine handle has been released.
    Closed,
}

impl SessionState {
    fn as_u8(self) -> u8 {
        match self {
            SessionState::Created => 0,
            SessionState::KeyConfigured => 1,
            SessionState::Handshaking => 2,
            SessionState::Established => 3,
            SessionState::Faulted => 4,
            SessionState::Closed => 5,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Created,
            1 => SessionState::KeyConfigured,
            2 => SessionState::Handshaking,
            3 => SessionState::Established,
            4 => SessionState::Faulted,
            _ => SessionState::Closed,
        }
    }
}

/// Session state, readable while an engine call holds the session lock.
#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: SessionState) -> Self {
        StateCell(AtomicU8::new(state.as_u8()))
    }

    fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Only called with the session lock held.
    fn set(&self, state: SessionState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

/// A blocking DTLS session over a connected datagram transport.
///
/// The socket owns one engine handle and drives it from `handshake`, `write` and
/// `read`. While the engine runs it calls back into the socket's transport and
/// timer pair on the same thread.
///
/// The engine is not thread safe, so every call takes the session lock for its
/// whole duration. A `DtlsSocket` can be shared between threads in an [`Arc`];
/// concurrent calls are serialized, not interleaved. A `read()` that waits for
/// traffic holds the lock until a record arrives, so configure a read timeout on
/// the transport if other threads need to write meanwhile.
///
/// The engine handle is released exactly once, by [`DtlsSocket::close`] or when
/// the socket is dropped, whichever comes first.
pub struct DtlsSocket {
    inner: Mutex<Inner>,
    state: Arc<StateCell>,
    factory: Arc<dyn EngineFactory>,
    config: Arc<Config>,
    peer: Option<SocketAddr>,
}

struct Inner {
    /// `None` once released.
    engine: Option<Box<dyn Engine>>,
    transport: Box<dyn DatagramTransport>,
    timer: TimerPair,
    scratch: Vec<u8>,
    state: Arc<StateCell>,
}

impl DtlsSocket {
    /// Create a session bound to `transport`.
    ///
    /// Installs the OS entropy source if the process has none yet, then asks
    /// `factory` for an engine handle.
    pub fn new<T>(
        factory: Arc<dyn EngineFactory>,
        transport: T,
        config: Arc<Config>,
    ) -> Result<Self, Error>
    where
        T: DatagramTransport + 'static,
    {
        entropy::ensure_initialized();

        let engine = factory.create(&config).map_err(|c| {
            Error::EngineSetup(EngineFault {
                code: c,
                message: factory.error_message(c),
            })
        })?;

        let peer = transport.peer_addr();
        debug!("Session created as {:?}, peer: {:?}", config.role(), peer);

        let state = Arc::new(StateCell::new(SessionState::Created));

        Ok(DtlsSocket {
            inner: Mutex::new(Inner {
                engine: Some(engine),
                transport: Box::new(transport),
                timer: TimerPair::new(),
                scratch: vec![0; config.max_datagram_size()],
                state: Arc::clone(&state),
            }),
            state,
            factory,
            config,
            peer,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Current lifecycle state.
    ///
    /// Does not wait for the session lock, so a caller on another thread sees
    /// `Handshaking` while `handshake()` runs. A session poisoned by a panic in an
    /// engine call reports `Faulted` until it is closed.
    pub fn state(&self) -> SessionState {
        let state = self.state.get();
        if state != SessionState::Closed && self.inner.is_poisoned() {
            return SessionState::Faulted;
        }
        state
    }

    /// Hand PSK credentials to the engine. Only valid before the handshake.
    pub fn configure_preshared_key(&self, key: &[u8], identity: &[u8]) -> Result<(), Error> {
        let mut inner = self.lock()?;
        inner.require_configurable("configure_preshared_key")?;

        let psk = PresharedKey::new(key, identity);
        let result = inner.engine_mut("configure_preshared_key")?.set_preshared_key(&psk);
        if result != 0 {
            return Err(Error::CryptoConfig(self.fault(result)));
        }

        debug!("PSK configured for identity {:?}", psk);
        inner.state.set(SessionState::KeyConfigured);
        Ok(())
    }

    /// Expected server name. Only valid before the handshake.
    pub fn set_hostname(&self, hostname: &str) -> Result<(), Error> {
        let mut inner = self.lock()?;
        inner.require_configurable("set_hostname")?;

        let result = inner.engine_mut("set_hostname")?.set_hostname(hostname);
        if result != 0 {
            return Err(Error::CryptoConfig(self.fault(result)));
        }
        Ok(())
    }

    /// Peer verification mode. Only valid before the handshake.
    pub fn set_auth_mode(&self, mode: AuthMode) -> Result<(), Error> {
        let mut inner = self.lock()?;
        inner.require_configurable("set_auth_mode")?;

        let result = inner.engine_mut("set_auth_mode")?.set_auth_mode(mode);
        if result != 0 {
            return Err(Error::CryptoConfig(self.fault(result)));
        }
        Ok(())
    }

    /// Run the handshake to completion.
    ///
    /// Blocks while flights are exchanged and retransmitted. Cannot be cancelled.
    /// Any engine failure is fatal to the session.
    pub fn handshake(&self) -> Result<(), Error> {
        let mut inner = self.lock()?;
        inner.require_configurable("handshake")?;
        inner.state.set(SessionState::Handshaking);

        debug!("Handshake start");
        let (result, cause) = inner.drive("handshake", |engine, io| engine.handshake(io))?;

        if result != 0 {
            inner.state.set(SessionState::Faulted);
            let fault = self.fault(result);
            warn!("Handshake failed: {}", fault);
            log_cause(cause);
            return Err(Error::Handshake(fault));
        }

        inner.state.set(SessionState::Established);
        debug!("Handshake complete");
        Ok(())
    }

    /// Run [`DtlsSocket::handshake`] on a worker thread.
    pub fn handshake_in_background(self: &Arc<Self>) -> JoinHandle<Result<(), Error>> {
        let socket = Arc::clone(self);
        thread::spawn(move || socket.handshake())
    }

    /// Send `buf` as application data.
    ///
    /// Either the whole payload is handed to the engine or the call fails.
    pub fn write(&self, buf: &[u8]) -> Result<(), Error> {
        let mut inner = self.lock()?;
        inner.require_established("write")?;

        let mut offset = 0;
        loop {
            let rest = &buf[offset..];
            let (result, cause) = inner.drive("write", |engine, io| engine.write(io, rest))?;

            // No progress on a non-empty payload would loop forever.
            let result = if result == 0 && !rest.is_empty() {
                code::SEND_FAILED
            } else {
                result
            };

            if result < 0 {
                inner.state.set(SessionState::Faulted);
                let fault = self.fault(result);
                warn!("Write failed: {}", fault);
                log_cause(cause);
                return Err(Error::Protocol(fault));
            }

            offset += (result as usize).min(rest.len());
            if offset >= buf.len() {
                break;
            }
        }

        trace!("Wrote {} bytes of application data", buf.len());
        Ok(())
    }

    /// Block until one application-data record arrives and return it.
    ///
    /// The result is exactly the record's payload. Records larger than
    /// [`Config::max_record_size`] are handled per [`Config::oversized_record`].
    /// If the transport has a read timeout and it expires, the error satisfies
    /// [`Error::is_timeout`] and the session stays established.
    pub fn read(&self) -> Result<Vec<u8>, Error> {
        let mut inner = self.lock()?;
        inner.require_established("read")?;

        let capacity = self.config.max_record_size();
        // The spare byte tells whether the record overflowed the capacity.
        let mut buf = vec![0u8; capacity + 1];
        let (result, cause) = inner.drive("read", |engine, io| engine.read(io, &mut buf))?;

        if result < 0 {
            let fault = self.fault(result);
            if result == code::RECEIVE_TIMEOUT {
                trace!("Read timed out");
            } else {
                inner.state.set(SessionState::Faulted);
                warn!("Read failed: {}", fault);
                log_cause(cause);
            }
            return Err(Error::Protocol(fault));
        }

        let n = (result as usize).min(buf.len());
        if n > capacity {
            match self.config.oversized_record() {
                OversizedRecord::Fail => {
                    warn!("Record exceeds read capacity {}", capacity);
                    return Err(Error::RecordTooLarge { capacity });
                }
                OversizedRecord::Truncate => {
                    warn!("Record truncated to read capacity {}", capacity);
                }
            }
        }

        buf.truncate(n.min(capacity));
        trace!("Read {} bytes of application data", buf.len());
        Ok(buf)
    }

    /// Run [`DtlsSocket::read`] on a worker thread.
    pub fn read_in_background(self: &Arc<Self>) -> JoinHandle<Result<Vec<u8>, Error>> {
        let socket = Arc::clone(self);
        thread::spawn(move || socket.read())
    }

    /// Release the engine handle. Calling it again does nothing.
    ///
    /// Waits for an engine call in progress on another thread to return.
    pub fn close(&self) {
        // A panic in an earlier engine call must not leak the handle.
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.release();
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, Error> {
        self.inner.lock().map_err(|_| Error::Poisoned)
    }

    fn fault(&self, code: i32) -> EngineFault {
        EngineFault {
            code,
            message: self.factory.error_message(code),
        }
    }
}

fn log_cause(cause: Option<io::Error>) {
    if let Some(e) = cause {
        debug!("Last transport fault: {}", e);
    }
}

impl Inner {
    fn require_configurable(&self, op: &'static str) -> Result<(), Error> {
        match self.state.get() {
            SessionState::Created | SessionState::KeyConfigured => Ok(()),
            state => Err(Error::State { op, state }),
        }
    }

    fn require_established(&self, op: &'static str) -> Result<(), Error> {
        match self.state.get() {
            SessionState::Established => Ok(()),
            state => Err(Error::State { op, state }),
        }
    }

    fn engine_mut(&mut self, op: &'static str) -> Result<&mut dyn Engine, Error> {
        let state = self.state.get();
        match self.engine.as_mut() {
            Some(engine) => Ok(engine.as_mut()),
            None => Err(Error::State { op, state }),
        }
    }

    /// Run one engine call with the callbacks bound to this session.
    fn drive<R>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut dyn Engine, &mut SessionIo<'_>) -> R,
    ) -> Result<(R, Option<io::Error>), Error> {
        let Inner {
            engine,
            transport,
            timer,
            scratch,
            state,
        } = self;

        let Some(engine) = engine.as_mut() else {
            return Err(Error::State {
                op,
                state: state.get(),
            });
        };

        let mut io = SessionIo::new(transport.as_mut(), timer, scratch);
        let result = f(engine.as_mut(), &mut io);
        Ok((result, io.take_fault()))
    }

    fn release(&mut self) {
        if let Some(engine) = self.engine.take() {
            self.timer.disarm();
            drop(engine);
            debug!("Engine handle released");
        }
        self.state.set(SessionState::Closed);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.release();
    }
}
