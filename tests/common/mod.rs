//! Shared helpers for integration tests.
//!
//! [`PskEngine`] is a small reference engine: a four-flight PSK handshake with
//! HMAC-SHA256 proofs and HMAC-tagged (not encrypted) application records. It
//! drives retransmission only through the timer callbacks, so it exercises the
//! same contract a real DTLS engine relies on.

#![allow(unused)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use dtls_socket::engine::code;
use dtls_socket::{
    entropy, Config, DtlsSocket, Engine, EngineFactory, EngineIo, MemoryTransport,
    PresharedKey, Role,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// PSK from the reference scenario.
pub const KEY: [u8; 16] = [
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f, 0x10,
];
pub const IDENTITY: &[u8] = b"client1";

/// Message types on the wire.
pub const CLIENT_HELLO: u8 = 1;
pub const SERVER_HELLO: u8 = 2;
pub const CLIENT_FINISHED: u8 = 3;
pub const SERVER_FINISHED: u8 = 4;
pub const APPLICATION_DATA: u8 = 23;

const RANDOM_LEN: usize = 32;
const MAC_LEN: usize = 32;
const RECORD_HEADER_LEN: usize = 1 + 8 + 2;
const MAX_PAYLOAD: usize = 16 * 1024;

/// Retransmission parameters of the reference engine.
#[derive(Debug, Clone, Copy)]
pub struct Params {
    pub start_rto_ms: u32,
    pub max_rto_ms: u32,
    pub max_retransmits: usize,
    /// How long a server waits for the first ClientHello.
    pub idle_limit: Duration,
}

impl Default for Params {
    fn default() -> Self {
        Params {
            start_rto_ms: 20,
            max_rto_ms: 200,
            max_retransmits: 20,
            idle_limit: Duration::from_secs(10),
        }
    }
}

/// Handle accounting shared by all engines of one factory.
#[derive(Debug, Default)]
pub struct Counters {
    pub created: AtomicUsize,
    pub released: AtomicUsize,
    pub retransmits: AtomicUsize,
    pub discarded: AtomicUsize,
    /// Calls that entered an engine handle while another call was inside it.
    pub overlaps: AtomicUsize,
}

impl Counters {
    pub fn live(&self) -> usize {
        self.created.load(Ordering::SeqCst) - self.released.load(Ordering::SeqCst)
    }
}

/// Marks a call in progress on one handle and notices overlapping calls.
struct CallGuard(Arc<AtomicBool>);

impl CallGuard {
    fn enter(in_call: &Arc<AtomicBool>, counters: &Counters) -> Self {
        if in_call.swap(true, Ordering::SeqCst) {
            counters.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        CallGuard(Arc::clone(in_call))
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct PskFactory {
    pub params: Params,
    pub counters: Arc<Counters>,
    /// Sleep inside every write, to widen races in concurrency tests.
    pub write_delay: Option<Duration>,
}

impl PskFactory {
    pub fn new(params: Params) -> Self {
        PskFactory {
            params,
            counters: Arc::new(Counters::default()),
            write_delay: None,
        }
    }
}

impl EngineFactory for PskFactory {
    fn create(&self, config: &Config) -> Result<Box<dyn Engine>, i32> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(PskEngine {
            role: config.role(),
            params: self.params,
            counters: Arc::clone(&self.counters),
            in_call: Arc::new(AtomicBool::new(false)),
            write_delay: self.write_delay,
            psk: None,
            client_random: [0; RANDOM_LEN],
            server_random: [0; RANDOM_LEN],
            tx_key: [0; MAC_LEN],
            rx_key: [0; MAC_LEN],
            tx_seq: 0,
            established: false,
            final_flight: Vec::new(),
            rx_buf: vec![0; RECORD_HEADER_LEN + MAX_PAYLOAD + MAC_LEN],
        }))
    }
}

pub struct PskEngine {
    role: Role,
    params: Params,
    counters: Arc<Counters>,
    in_call: Arc<AtomicBool>,
    write_delay: Option<Duration>,
    psk: Option<PresharedKey>,
    client_random: [u8; RANDOM_LEN],
    server_random: [u8; RANDOM_LEN],
    tx_key: [u8; MAC_LEN],
    rx_key: [u8; MAC_LEN],
    tx_seq: u64,
    established: bool,
    /// Server only: resent when the client repeats its Finished.
    final_flight: Vec<u8>,
    rx_buf: Vec<u8>,
}

impl Drop for PskEngine {
    fn drop(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

fn mac(key: &[u8], parts: &[&[u8]]) -> [u8; MAC_LEN] {
    let mut m = HmacSha256::new_from_slice(key).expect("HMAC takes any key length");
    for p in parts {
        m.update(p);
    }
    let mut out = [0u8; MAC_LEN];
    out.copy_from_slice(&m.finalize().into_bytes());
    out
}

fn verify(key: &[u8], parts: &[&[u8]], tag: &[u8]) -> bool {
    let mut m = HmacSha256::new_from_slice(key).expect("HMAC takes any key length");
    for p in parts {
        m.update(p);
    }
    m.verify_slice(tag).is_ok()
}

/// Send `flight`, then wait for a message `accept` likes, retransmitting on the
/// timer. A repeat of the peer's previous flight triggers an immediate resend.
fn exchange(
    io: &mut dyn EngineIo,
    params: &Params,
    counters: &Counters,
    flight: &[u8],
    accept: impl Fn(&[u8]) -> bool,
    peer_previous: Option<u8>,
) -> Result<Vec<u8>, i32> {
    let mut rto = params.start_rto_ms;
    let mut retransmits = 0;
    let mut early_resend_done = false;
    let mut buf = vec![0u8; 2048];

    io.send(flight);
    io.set_timer(rto / 4, rto);

    loop {
        match io.get_timer() {
            2 => {
                retransmits += 1;
                if retransmits > params.max_retransmits {
                    io.set_timer(0, 0);
                    return Err(code::RECEIVE_TIMEOUT);
                }
                rto = (rto * 2).min(params.max_rto_ms);
                counters.retransmits.fetch_add(1, Ordering::SeqCst);
                io.send(flight);
                io.set_timer(rto / 4, rto);
                early_resend_done = false;
            }
            1 if !early_resend_done => {
                counters.retransmits.fetch_add(1, Ordering::SeqCst);
                io.send(flight);
                early_resend_done = true;
            }
            _ => {}
        }

        let n = io.receive_timeout(&mut buf, (rto / 4).max(1));
        if n < 0 {
            // Timeouts and transport faults alike: the timer decides when to give up.
            continue;
        }

        let msg = &buf[..n as usize];
        if accept(msg) {
            return Ok(msg.to_vec());
        }

        if peer_previous.is_some() && msg.first().copied() == peer_previous {
            io.send(flight);
        } else {
            counters.discarded.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl PskEngine {
    fn key(&self) -> Result<&[u8], i32> {
        self.psk
            .as_ref()
            .map(|p| p.key())
            .ok_or(code::BAD_INPUT)
    }

    fn derive_keys(&mut self) -> Result<(), i32> {
        let psk = self.key()?.to_vec();
        let c2s = mac(&psk, &[b"c2s", &self.client_random, &self.server_random]);
        let s2c = mac(&psk, &[b"s2c", &self.client_random, &self.server_random]);
        match self.role {
            Role::Client => {
                self.tx_key = c2s;
                self.rx_key = s2c;
            }
            Role::Server => {
                self.tx_key = s2c;
                self.rx_key = c2s;
            }
        }
        self.established = true;
        Ok(())
    }

    fn client_handshake(&mut self, io: &mut dyn EngineIo) -> Result<(), i32> {
        let psk = self.key()?.to_vec();
        let identity = self.psk.as_ref().map(|p| p.identity().to_vec()).unwrap_or_default();

        let rc = entropy::fill(&mut self.client_random);
        if rc != 0 {
            return Err(rc);
        }

        let mut hello = vec![CLIENT_HELLO];
        hello.extend_from_slice(&self.client_random);
        hello.push(identity.len() as u8);
        hello.extend_from_slice(&identity);

        let server_hello = exchange(
            io,
            &self.params,
            &self.counters,
            &hello,
            |m| m.len() == 1 + RANDOM_LEN + MAC_LEN && m[0] == SERVER_HELLO,
            None,
        )?;
        self.server_random
            .copy_from_slice(&server_hello[1..1 + RANDOM_LEN]);

        let cr = self.client_random;
        let sr = self.server_random;
        if !verify(&psk, &[b"server", &cr, &sr], &server_hello[1 + RANDOM_LEN..]) {
            io.set_timer(0, 0);
            return Err(code::FATAL_ALERT_MESSAGE);
        }

        let mut finished = vec![CLIENT_FINISHED];
        finished.extend_from_slice(&mac(&psk, &[b"client", &cr, &sr]));

        let server_finished = exchange(
            io,
            &self.params,
            &self.counters,
            &finished,
            |m| m.len() == 1 + MAC_LEN && m[0] == SERVER_FINISHED,
            Some(SERVER_HELLO),
        )?;
        io.set_timer(0, 0);

        if !verify(&psk, &[b"done", &cr, &sr], &server_finished[1..]) {
            return Err(code::FATAL_ALERT_MESSAGE);
        }

        self.derive_keys()
    }

    fn server_handshake(&mut self, io: &mut dyn EngineIo) -> Result<(), i32> {
        let psk = self.key()?.to_vec();
        let identity = self.psk.as_ref().map(|p| p.identity().to_vec()).unwrap_or_default();

        // Wait for a well-formed ClientHello.
        let deadline = Instant::now() + self.params.idle_limit;
        let mut buf = vec![0u8; 2048];
        loop {
            if Instant::now() >= deadline {
                return Err(code::RECEIVE_TIMEOUT);
            }
            let n = io.receive_timeout(&mut buf, 50);
            if n < 0 {
                continue;
            }
            let m = &buf[..n as usize];
            if m.len() < 2 + RANDOM_LEN || m[0] != CLIENT_HELLO {
                self.counters.discarded.fetch_add(1, Ordering::SeqCst);
                continue;
            }
            let id_len = m[1 + RANDOM_LEN] as usize;
            if m.len() != 2 + RANDOM_LEN + id_len {
                self.counters.discarded.fetch_add(1, Ordering::SeqCst);
                continue;
            }
            if &m[2 + RANDOM_LEN..] != identity.as_slice() {
                return Err(code::UNKNOWN_IDENTITY);
            }
            self.client_random.copy_from_slice(&m[1..1 + RANDOM_LEN]);
            break;
        }

        let rc = entropy::fill(&mut self.server_random);
        if rc != 0 {
            return Err(rc);
        }

        let cr = self.client_random;
        let sr = self.server_random;

        let mut hello = vec![SERVER_HELLO];
        hello.extend_from_slice(&sr);
        hello.extend_from_slice(&mac(&psk, &[b"server", &cr, &sr]));

        let client_finished = exchange(
            io,
            &self.params,
            &self.counters,
            &hello,
            |m| m.len() == 1 + MAC_LEN && m[0] == CLIENT_FINISHED,
            Some(CLIENT_HELLO),
        )?;
        io.set_timer(0, 0);

        if !verify(&psk, &[b"client", &cr, &sr], &client_finished[1..]) {
            return Err(code::FATAL_ALERT_MESSAGE);
        }

        let mut finished = vec![SERVER_FINISHED];
        finished.extend_from_slice(&mac(&psk, &[b"done", &cr, &sr]));
        io.send(&finished);
        self.final_flight = finished;

        self.derive_keys()
    }
}

impl Engine for PskEngine {
    fn set_preshared_key(&mut self, psk: &PresharedKey) -> i32 {
        let _g = CallGuard::enter(&self.in_call, &self.counters);
        if psk.key().is_empty() || psk.identity().is_empty() || psk.identity().len() > 255 {
            return code::BAD_INPUT;
        }
        self.psk = Some(psk.clone());
        0
    }

    fn handshake(&mut self, io: &mut dyn EngineIo) -> i32 {
        let _g = CallGuard::enter(&self.in_call, &self.counters);
        let result = match self.role {
            Role::Client => self.client_handshake(io),
            Role::Server => self.server_handshake(io),
        };
        match result {
            Ok(()) => 0,
            Err(e) => e,
        }
    }

    fn write(&mut self, io: &mut dyn EngineIo, buf: &[u8]) -> i32 {
        let _g = CallGuard::enter(&self.in_call, &self.counters);
        if !self.established {
            return code::BAD_INPUT;
        }
        if let Some(d) = self.write_delay {
            thread::sleep(d);
        }

        let payload = &buf[..buf.len().min(MAX_PAYLOAD)];
        let seq = self.tx_seq.to_be_bytes();
        let len = (payload.len() as u16).to_be_bytes();
        self.tx_seq += 1;

        let mut record = Vec::with_capacity(RECORD_HEADER_LEN + payload.len() + MAC_LEN);
        record.push(APPLICATION_DATA);
        record.extend_from_slice(&seq);
        record.extend_from_slice(&len);
        record.extend_from_slice(payload);
        record.extend_from_slice(&mac(&self.tx_key, &[&seq, payload]));

        let rc = io.send(&record);
        if rc < 0 {
            return rc;
        }
        payload.len() as i32
    }

    fn read(&mut self, io: &mut dyn EngineIo, buf: &mut [u8]) -> i32 {
        let _g = CallGuard::enter(&self.in_call, &self.counters);
        if !self.established {
            return code::BAD_INPUT;
        }

        loop {
            let n = io.receive(&mut self.rx_buf);
            if n < 0 {
                return n;
            }
            let m = &self.rx_buf[..n as usize];

            match m.first().copied() {
                Some(APPLICATION_DATA) if m.len() >= RECORD_HEADER_LEN + MAC_LEN => {
                    let len = u16::from_be_bytes([m[9], m[10]]) as usize;
                    if m.len() != RECORD_HEADER_LEN + len + MAC_LEN {
                        // Truncated or padded datagram.
                        self.counters.discarded.fetch_add(1, Ordering::SeqCst);
                        continue;
                    }
                    let seq = &m[1..9];
                    let payload = &m[RECORD_HEADER_LEN..RECORD_HEADER_LEN + len];
                    let tag = &m[RECORD_HEADER_LEN + len..];
                    if !verify(&self.rx_key, &[seq, payload], tag) {
                        self.counters.discarded.fetch_add(1, Ordering::SeqCst);
                        continue;
                    }
                    let copy = len.min(buf.len());
                    buf[..copy].copy_from_slice(&payload[..copy]);
                    return copy as i32;
                }
                Some(CLIENT_FINISHED) if self.role == Role::Server => {
                    // Our Finished was lost, the client is still waiting.
                    self.counters.retransmits.fetch_add(1, Ordering::SeqCst);
                    let flight = self.final_flight.clone();
                    io.send(&flight);
                }
                _ => {
                    self.counters.discarded.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }
}

/// Options for one end of a test link.
#[derive(Debug, Clone)]
pub struct End {
    pub key: Vec<u8>,
    pub identity: Vec<u8>,
    pub loss: f64,
    pub seed: Option<u64>,
    pub read_timeout: Option<Duration>,
    pub config: Config,
}

impl End {
    pub fn new(role: Role) -> Self {
        End {
            key: KEY.to_vec(),
            identity: IDENTITY.to_vec(),
            loss: 0.0,
            seed: None,
            read_timeout: None,
            config: Config::builder()
                .role(role)
                .build()
                .expect("valid config"),
        }
    }

    pub fn client() -> Self {
        End::new(Role::Client)
    }

    pub fn server() -> Self {
        End::new(Role::Server)
    }

    fn socket(&self, factory: &Arc<PskFactory>, transport: MemoryTransport) -> DtlsSocket {
        let transport = transport
            .with_loss(self.loss, self.seed)
            .with_read_timeout(self.read_timeout);
        let factory: Arc<dyn EngineFactory> = factory.clone();
        let socket = DtlsSocket::new(factory, transport, Arc::new(self.config.clone()))
            .expect("create session");
        socket
            .configure_preshared_key(&self.key, &self.identity)
            .expect("psk accepted");
        socket
    }
}

/// Client and server sessions over an in-memory link, PSK configured.
pub fn sessions(
    factory: &Arc<PskFactory>,
    client: &End,
    server: &End,
) -> (Arc<DtlsSocket>, Arc<DtlsSocket>) {
    let (a, b) = MemoryTransport::pair();
    (
        Arc::new(client.socket(factory, a)),
        Arc::new(server.socket(factory, b)),
    )
}

/// Handshake both ends of a lossless link.
pub fn established(factory: &Arc<PskFactory>) -> (Arc<DtlsSocket>, Arc<DtlsSocket>) {
    established_with(factory, &End::client(), &End::server())
}

pub fn established_with(
    factory: &Arc<PskFactory>,
    client: &End,
    server: &End,
) -> (Arc<DtlsSocket>, Arc<DtlsSocket>) {
    let (c, s) = sessions(factory, client, server);
    let server_done = s.handshake_in_background();
    c.handshake().expect("client handshake");
    server_done
        .join()
        .expect("server thread")
        .expect("server handshake");
    (c, s)
}
