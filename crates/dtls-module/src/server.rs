//! # Server: the single-threaded event loop
//!
//! ```text
//! loop {
//!     token cancelled?            -> close everything, return
//!     WatchedSet::build(endpoint, registry)
//!     Poller::wait(idle_timeout)
//!       Listener                  -> AcceptPump::pump
//!       Session (PENDING)         -> AcceptPump::advance
//!       Session (ESTABLISHED)     -> SessionDriver::service
//! }
//! ```
//!
//! Everything runs on the calling thread and nothing but `poll(2)` blocks.
//! Per-session failures stay inside their session. Only setup failures and
//! multiplexer failures end the loop early.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use dtls_core::cancel::CancellationToken;
use dtls_core::config::ServerConfig;
use dtls_core::error::Result;
use dtls_core::session::HandshakeState;
use dtls_core::transport::SecureContext;

use tracing::{debug, error, info, trace};

use crate::accept::AcceptPump;
use crate::driver::SessionDriver;
use crate::endpoint::ListeningEndpoint;
use crate::poller::{Poller, Token, WatchedSet};
use crate::registry::SessionRegistry;
use crate::stats::Stats;

/// What was left behind when the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Sessions still open at shutdown, each closed exactly once.
    pub sessions_closed: usize,
    pub stats: Stats,
    pub uptime: Duration,
}

pub struct Server<C: SecureContext> {
    config: ServerConfig,
    context: C,
    endpoint: ListeningEndpoint,
    registry: SessionRegistry<C::Session>,
    poller: Poller,
    pump: AcceptPump,
    driver: SessionDriver,
    stats: Stats,
    token: CancellationToken,
    started: Instant,
}

impl<C: SecureContext> Server<C> {
    /// Validate `config` and open the listening endpoint.
    ///
    /// `context` has already loaded its credentials; any failure here or
    /// there is setup-fatal.
    pub fn bind(config: ServerConfig, context: C, token: CancellationToken) -> Result<Self> {
        config.validate()?;
        let endpoint = ListeningEndpoint::bind(config.listen_addr(), config.peek_len)?;
        let registry = SessionRegistry::new(config.max_sessions);
        let driver = SessionDriver::new(config.max_datagram, config.ack.clone());

        info!(
            addr = %endpoint.local_addr(),
            max_sessions = config.max_sessions,
            idle_timeout_secs = config.idle_timeout.as_secs(),
            "server ready"
        );

        Ok(Self {
            config,
            context,
            endpoint,
            registry,
            poller: Poller::new(),
            pump: AcceptPump::new(),
            driver,
            stats: Stats::new(),
            token,
            started: Instant::now(),
        })
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry<C::Session> {
        &self.registry
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// The descriptors the next cycle will wait on.
    pub fn watched(&self) -> WatchedSet<'_> {
        WatchedSet::build(&self.endpoint, &self.registry)
    }

    /// Run one wake cycle, waiting at most `timeout`.
    ///
    /// Returns how many ready descriptors were serviced; zero on timeout or
    /// signal interruption.
    pub fn turn(&mut self, timeout: Duration) -> Result<usize> {
        let timeouts = self.poller.timeouts();
        let ready = {
            let watched = WatchedSet::build(&self.endpoint, &self.registry);
            self.poller.wait(&watched, timeout)?
        };

        if ready.is_empty() {
            if self.poller.timeouts() > timeouts {
                debug!("no activity before timeout");
                self.stats.log(self.registry.len(), self.started.elapsed());
            }
            return Ok(0);
        }

        for token in ready.iter() {
            match token {
                Token::Listener => {
                    let outcome = self.pump.pump(
                        &mut self.endpoint,
                        &self.context,
                        &mut self.registry,
                        &mut self.stats,
                    );
                    trace!(?outcome, "listener serviced");
                }
                Token::Session(id) => match self.registry.state(id) {
                    Some(HandshakeState::Pending) => {
                        self.pump.advance(&mut self.registry, id, &mut self.stats);
                    }
                    Some(HandshakeState::Established) => {
                        self.driver.service(&mut self.registry, id, &mut self.stats);
                    }
                    // Torn down earlier in this cycle.
                    _ => trace!(session = %id, "stale readiness ignored"),
                },
            }
        }
        Ok(ready.len())
    }

    /// Loop until the token is cancelled, then close everything.
    ///
    /// A multiplexer failure also closes everything, then is returned. It is
    /// the only error `turn` can produce.
    pub fn run(mut self) -> Result<ShutdownReport> {
        info!(addr = %self.local_addr(), "awaiting client connection");
        while !self.token.is_cancelled() {
            let timeout = self.config.idle_timeout;
            if let Err(e) = self.turn(timeout) {
                error!(error = %e, "multiplexer failed, stopping");
                self.shutdown();
                return Err(e);
            }
        }
        info!("shutdown requested");
        Ok(self.shutdown())
    }

    /// Close every session exactly once, then the listening endpoint.
    pub fn shutdown(mut self) -> ShutdownReport {
        let ids = self.registry.ids();
        let mut closed = 0;
        for id in ids {
            if self.registry.retire(id).is_some() {
                closed += 1;
                self.stats.closes += 1;
            }
        }
        let uptime = self.started.elapsed();
        self.stats.log(self.registry.len(), uptime);
        info!(sessions = closed, "all descriptors closed");

        ShutdownReport {
            sessions_closed: closed,
            stats: self.stats.clone(),
            uptime,
        }
        // `self` drops here, closing the listening endpoint.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plain::{
        client_handshake, PlainSession, PlainTransport, BYE, HELLO, HELLO_VERIFIED, VERIFY, WELCOME,
    };
    use dtls_core::channel::PeerChannel;
    use dtls_core::constants::ACK;
    use dtls_core::session::SessionId;
    use dtls_core::transport::{SecureSession, TransportError};
    use std::net::UdpSocket;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn config() -> ServerConfig {
        ServerConfig::new()
            .bind_addr("127.0.0.1".parse().unwrap())
            .port(0)
            .idle_timeout(Duration::from_millis(100))
    }

    fn plain_server(config: ServerConfig) -> Server<PlainTransport> {
        let ctx = PlainTransport::context(&config).unwrap();
        Server::bind(config, ctx, CancellationToken::new()).unwrap()
    }

    fn client(server: SocketAddr) -> UdpSocket {
        let s = UdpSocket::bind("127.0.0.1:0").unwrap();
        s.connect(server).unwrap();
        s.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        s
    }

    /// Turn the server until `done` holds.
    fn turn_until<C: SecureContext>(server: &mut Server<C>, mut done: impl FnMut(&Server<C>) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !done(&*server) {
            assert!(Instant::now() < deadline, "condition never reached");
            server.turn(Duration::from_millis(20)).unwrap();
        }
    }

    /// Complete the handshake for `sock`, turning the server between the
    /// client's flights.
    fn establish<C: SecureContext>(server: &mut Server<C>, sock: &UdpSocket) -> SessionId {
        let me = sock.local_addr().unwrap();
        sock.send(HELLO).unwrap();
        turn_until(server, |s| s.registry().find_peer(me).is_some());
        let id = server.registry().find_peer(me).unwrap();

        let mut buf = [0u8; 64];
        let n = sock.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], VERIFY);

        sock.send(HELLO_VERIFIED).unwrap();
        turn_until(server, |s| {
            s.registry().state(id) == Some(HandshakeState::Established)
        });
        let n = sock.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], WELCOME);
        id
    }

    fn ping<C: SecureContext>(server: &mut Server<C>, sock: &UdpSocket, payload: &[u8]) -> Vec<u8> {
        let before = server.stats().reads;
        sock.send(payload).unwrap();
        turn_until(server, |s| s.stats().reads > before);
        let mut buf = [0u8; 128];
        let n = sock.recv(&mut buf).unwrap();
        buf[..n].to_vec()
    }

    fn assert_silent(sock: &UdpSocket) {
        sock.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
        let mut buf = [0u8; 64];
        assert!(sock.recv(&mut buf).is_err(), "unexpected datagram");
        sock.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    }

    #[test]
    fn test_ping_gets_exactly_one_ack() {
        let mut server = plain_server(config());
        let a = client(server.local_addr());
        let id = establish(&mut server, &a);

        assert_eq!(ping(&mut server, &a, b"ping"), ACK);
        assert_silent(&a);

        assert_eq!(server.stats().reads, 1);
        assert_eq!(server.stats().writes, 1);
        assert_eq!(server.registry().state(id), Some(HandshakeState::Established));
        assert!(server.watched().contains(Token::Session(id)));
        assert!(server.watched().contains(Token::Listener));
    }

    #[test]
    fn test_failed_handshake_then_next_peer_succeeds() {
        let mut server = plain_server(config());
        let b = client(server.local_addr());
        b.send(b"GARBAGE").unwrap();
        turn_until(&mut server, |s| s.stats().handshake_failures == 1);

        assert!(server.registry().is_empty());
        assert_eq!(server.watched().len(), 1);

        let c = client(server.local_addr());
        let id = establish(&mut server, &c);
        assert_eq!(ping(&mut server, &c, b"hello"), ACK);
        assert_eq!(server.registry().len(), 1);
        assert!(server.registry().contains(id));
    }

    #[test]
    fn test_fatal_read_is_isolated() {
        let mut server = plain_server(config());
        let a = client(server.local_addr());
        let b = client(server.local_addr());
        let id_a = establish(&mut server, &a);
        let id_b = establish(&mut server, &b);

        a.send(BYE).unwrap();
        turn_until(&mut server, |s| !s.registry().contains(id_a));

        assert!(!server.watched().contains(Token::Session(id_a)));
        assert_eq!(server.registry().state(id_b), Some(HandshakeState::Established));
        assert_eq!(ping(&mut server, &b, b"still here"), ACK);
        assert_eq!(server.stats().read_errors, 1);
        assert_eq!(server.stats().closes, 1);
    }

    #[test]
    fn test_peers_arriving_in_one_cycle_all_establish() {
        let mut server = plain_server(config());
        let peers: Vec<UdpSocket> = (0..3).map(|_| client(server.local_addr())).collect();
        for p in &peers {
            p.send(HELLO).unwrap();
        }
        // Let every HELLO queue on the listener before the first wake.
        thread::sleep(Duration::from_millis(20));

        let addrs: Vec<SocketAddr> = peers.iter().map(|p| p.local_addr().unwrap()).collect();
        turn_until(&mut server, |s| {
            addrs.iter().all(|a| s.registry().find_peer(*a).is_some())
        });
        assert_eq!(server.stats().accepts, 3);

        let mut buf = [0u8; 64];
        for p in &peers {
            let n = p.recv(&mut buf).unwrap();
            assert_eq!(&buf[..n], VERIFY);
            p.send(HELLO_VERIFIED).unwrap();
        }
        turn_until(&mut server, |s| s.stats().handshakes == 3);

        for p in &peers {
            let n = p.recv(&mut buf).unwrap();
            assert_eq!(&buf[..n], WELCOME);
            assert_eq!(ping(&mut server, p, b"together"), ACK);
        }
        assert_eq!(server.registry().len(), 3);
        assert_eq!(server.stats().refused, 0);
    }

    #[test]
    fn test_idle_pump_leaves_sessions_alone() {
        let mut server = plain_server(config());
        let a = client(server.local_addr());
        establish(&mut server, &a);
        let b = client(server.local_addr());
        let me = b.local_addr().unwrap();
        b.send(HELLO).unwrap();
        turn_until(&mut server, |s| s.registry().find_peer(me).is_some());

        let ids = server.registry().ids();
        let watched: Vec<Token> = server.watched().tokens().collect();
        assert_eq!(watched.len(), 3);

        let outcome = server.pump.pump(
            &mut server.endpoint,
            &server.context,
            &mut server.registry,
            &mut server.stats,
        );
        assert_eq!(outcome, crate::accept::AcceptOutcome::Idle);
        assert_eq!(server.registry().ids(), ids);
        assert_eq!(server.watched().tokens().collect::<Vec<_>>(), watched);
        assert_eq!(server.stats().accepts, 2);
    }

    #[test]
    fn test_largest_payload_is_acked() {
        let mut server = plain_server(config());
        let a = client(server.local_addr());
        establish(&mut server, &a);

        let payload = vec![b'z'; 4095];
        assert_eq!(ping(&mut server, &a, &payload), ACK);
        assert_eq!(server.stats().bytes_in, 4095);
    }

    #[test]
    fn test_turn_times_out_empty() {
        let mut server = plain_server(config());
        let start = Instant::now();
        assert_eq!(server.turn(Duration::from_millis(30)).unwrap(), 0);
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(server.registry().is_empty());
        assert_eq!(server.stats(), &Stats::new());
    }

    #[test]
    fn test_pending_session_is_watched() {
        let mut server = plain_server(config());
        let a = client(server.local_addr());
        let me = a.local_addr().unwrap();
        a.send(HELLO).unwrap();
        turn_until(&mut server, |s| s.registry().find_peer(me).is_some());

        let id = server.registry().find_peer(me).unwrap();
        assert_eq!(server.registry().state(id), Some(HandshakeState::Pending));
        assert!(server.watched().contains(Token::Session(id)));
    }

    #[test]
    fn test_capacity_refuses_extra_peer() {
        let mut server = plain_server(config().max_sessions(1));
        let a = client(server.local_addr());
        establish(&mut server, &a);

        let b = client(server.local_addr());
        b.send(HELLO).unwrap();
        turn_until(&mut server, |s| s.stats().refused == 1);
        assert_eq!(server.registry().len(), 1);
        assert_eq!(ping(&mut server, &a, b"ping"), ACK);
    }

    #[test]
    fn test_bind_rejects_invalid_config() {
        let config = config().max_sessions(0);
        let ctx = PlainTransport::context(&config).unwrap();
        let err = Server::bind(config, ctx, CancellationToken::new())
            .err()
            .expect("invalid config");
        assert!(matches!(err, dtls_core::error::ServerError::Config(_)));
    }

    // Fault-injecting wrapper: counts teardown calls and fails writes on
    // request.

    #[derive(Default)]
    struct Probes {
        shutdowns: AtomicUsize,
        drops: AtomicUsize,
    }

    struct Faulty {
        inner: PlainTransport,
        probes: Arc<Probes>,
    }

    struct FaultySession {
        inner: PlainSession,
        probes: Arc<Probes>,
        fail_writes: bool,
    }

    impl SecureContext for Faulty {
        type Session = FaultySession;

        fn new_session(&self, channel: PeerChannel) -> std::result::Result<FaultySession, TransportError> {
            Ok(FaultySession {
                inner: self.inner.new_session(channel)?,
                probes: Arc::clone(&self.probes),
                fail_writes: false,
            })
        }
    }

    impl SecureSession for FaultySession {
        fn set_nonblocking(&mut self, on: bool) -> std::result::Result<(), TransportError> {
            self.inner.set_nonblocking(on)
        }
        fn accept(&mut self) -> std::result::Result<(), TransportError> {
            self.inner.accept()
        }
        fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, TransportError> {
            let n = self.inner.read(buf)?;
            if &buf[..n] == b"break your pipe" {
                self.fail_writes = true;
            }
            Ok(n)
        }
        fn write(&mut self, buf: &[u8]) -> std::result::Result<usize, TransportError> {
            if self.fail_writes {
                return Err(TransportError::fatal(libc::EPIPE, "injected write failure"));
            }
            self.inner.write(buf)
        }
        fn shutdown(&mut self) {
            self.probes.shutdowns.fetch_add(1, Ordering::SeqCst);
            self.inner.shutdown();
        }
        fn channel(&self) -> &PeerChannel {
            self.inner.channel()
        }
    }

    impl Drop for FaultySession {
        fn drop(&mut self) {
            self.probes.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn faulty_server() -> (Server<Faulty>, Arc<Probes>) {
        let config = config();
        let probes = Arc::new(Probes::default());
        let ctx = Faulty {
            inner: PlainTransport::context(&config).unwrap(),
            probes: Arc::clone(&probes),
        };
        let server = Server::bind(config, ctx, CancellationToken::new()).unwrap();
        (server, probes)
    }

    #[test]
    fn test_write_failure_closes_session() {
        let (mut server, probes) = faulty_server();
        let a = client(server.local_addr());
        let b = client(server.local_addr());
        let id_a = establish(&mut server, &a);
        establish(&mut server, &b);

        a.send(b"break your pipe").unwrap();
        turn_until(&mut server, |s| !s.registry().contains(id_a));

        assert_eq!(server.stats().write_errors, 1);
        assert_eq!(probes.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(probes.drops.load(Ordering::SeqCst), 1);
        assert_eq!(ping(&mut server, &b, b"ping"), ACK);
    }

    #[test]
    fn test_shutdown_closes_each_session_once() {
        let (mut server, probes) = faulty_server();
        let clients: Vec<UdpSocket> = (0..3).map(|_| client(server.local_addr())).collect();
        for c in &clients {
            establish(&mut server, c);
        }
        // One more left mid-handshake.
        let late = client(server.local_addr());
        let me = late.local_addr().unwrap();
        late.send(HELLO).unwrap();
        turn_until(&mut server, |s| s.registry().find_peer(me).is_some());

        server.token().cancel();
        let report = server.run().unwrap();

        assert_eq!(report.sessions_closed, 4);
        assert_eq!(probes.shutdowns.load(Ordering::SeqCst), 4);
        assert_eq!(probes.drops.load(Ordering::SeqCst), 4);

        // Established peers were told.
        for c in &clients {
            let mut buf = [0u8; 16];
            let n = c.recv(&mut buf).unwrap();
            assert_eq!(&buf[..n], BYE);
        }
    }

    #[test]
    fn test_run_stops_when_cancelled_from_another_thread() {
        let server = plain_server(config());
        let addr = server.local_addr();
        let token = server.token().clone();

        let handle = thread::spawn(move || server.run());

        let a = client(addr);
        client_handshake(&a).unwrap();
        a.send(b"ping").unwrap();
        let mut buf = [0u8; 64];
        let n = a.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], ACK);

        token.cancel();
        let report = handle.join().unwrap().unwrap();
        assert_eq!(report.sessions_closed, 1);
        assert_eq!(report.stats.handshakes, 1);
        assert_eq!(report.stats.writes, 1);
    }
}
