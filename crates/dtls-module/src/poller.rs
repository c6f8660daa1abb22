//! # Poller: the readiness multiplexer
//!
//! The only place the server thread ever blocks. Each wake cycle:
//! 1. The watched set is derived fresh from the listening endpoint and the
//!    session registry (no separately tracked max descriptor)
//! 2. `poll(2)` blocks until something is readable or the timeout elapses
//! 3. The ready descriptors are reported back as `Token`s
//!
//! Because the watched set is rebuilt every cycle from what the registry
//! currently owns, a descriptor removed by a teardown can never be polled
//! again, and a session added mid-cycle is picked up on the next one.

use std::os::fd::{AsFd, BorrowedFd};
use std::time::Duration;

use dtls_core::error::{Result, ServerError};
use dtls_core::session::SessionId;
use dtls_core::transport::SecureSession;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::trace;

use crate::endpoint::ListeningEndpoint;
use crate::registry::SessionRegistry;

/// What a watched descriptor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    Listener,
    Session(SessionId),
}

/// Descriptors eligible for readiness notification this cycle.
///
/// Borrows the descriptors from their owners, so nothing can be closed
/// while the set is alive.
pub struct WatchedSet<'a> {
    entries: Vec<(Token, BorrowedFd<'a>)>,
}

impl<'a> WatchedSet<'a> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// The listening endpoint (first, by convention) plus every
    /// PENDING/ESTABLISHED session.
    pub fn build<S: SecureSession>(
        endpoint: &'a ListeningEndpoint,
        registry: &'a SessionRegistry<S>,
    ) -> Self {
        let mut set = Self {
            entries: Vec::with_capacity(registry.len() + 1),
        };
        set.push(Token::Listener, endpoint.as_fd());
        for (id, fd) in registry.watched() {
            set.push(Token::Session(id), fd);
        }
        set
    }

    pub fn push(&mut self, token: Token, fd: BorrowedFd<'a>) {
        self.entries.push((token, fd));
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, token: Token) -> bool {
        self.entries.iter().any(|(t, _)| *t == token)
    }

    pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.entries.iter().map(|(t, _)| *t)
    }
}

impl Default for WatchedSet<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Tokens whose descriptors were ready, in watched-set order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadySet {
    tokens: Vec<Token>,
}

impl ReadySet {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn contains(&self, token: Token) -> bool {
        self.tokens.contains(&token)
    }

    pub fn iter(&self) -> impl Iterator<Item = Token> + '_ {
        self.tokens.iter().copied()
    }
}

/// `poll(2)`-backed readiness multiplexer.
#[derive(Debug, Default)]
pub struct Poller {
    wakeups: u64,
    timeouts: u64,
    interrupts: u64,
}

impl Poller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until a watched descriptor is readable or `timeout` elapses.
    ///
    /// A timeout yields an empty set, as does a signal interrupting the
    /// wait (so the caller re-checks its cancellation token). Any other
    /// failure is multiplexer-fatal.
    pub fn wait(&mut self, watched: &WatchedSet<'_>, timeout: Duration) -> Result<ReadySet> {
        let mut fds: Vec<PollFd<'_>> = watched
            .entries
            .iter()
            .map(|(_, fd)| PollFd::new(*fd, PollFlags::POLLIN))
            .collect();
        let timeout = PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX);

        match poll(&mut fds, timeout) {
            Ok(0) => {
                self.timeouts += 1;
                Ok(ReadySet::default())
            }
            Ok(n) => {
                self.wakeups += 1;
                // Errors and hangups count as readable: the next read on that
                // descriptor reports the failure and tears the session down.
                let interesting = PollFlags::POLLIN
                    | PollFlags::POLLERR
                    | PollFlags::POLLHUP
                    | PollFlags::POLLNVAL;
                let tokens: Vec<Token> = watched
                    .entries
                    .iter()
                    .zip(fds.iter())
                    .filter(|(_, pfd)| {
                        pfd.revents()
                            .is_some_and(|revents| revents.intersects(interesting))
                    })
                    .map(|((token, _), _)| *token)
                    .collect();
                trace!(ready = n, watched = watched.len(), "poll woke");
                Ok(ReadySet { tokens })
            }
            Err(Errno::EINTR) => {
                self.interrupts += 1;
                trace!("poll interrupted by signal");
                Ok(ReadySet::default())
            }
            Err(e) => Err(ServerError::Multiplexer(e.into())),
        }
    }

    /// Waits that returned at least one ready descriptor.
    #[inline]
    pub fn wakeups(&self) -> u64 {
        self.wakeups
    }

    /// Waits that ran the full timeout with nothing ready.
    #[inline]
    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    #[inline]
    pub fn interrupts(&self) -> u64 {
        self.interrupts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::time::Instant;

    #[test]
    fn test_timeout_returns_empty_set() {
        let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut watched = WatchedSet::new();
        watched.push(Token::Listener, sock.as_fd());

        let mut poller = Poller::new();
        let start = Instant::now();
        let ready = poller.wait(&watched, Duration::from_millis(50)).unwrap();
        assert!(ready.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(poller.timeouts(), 1);
        assert_eq!(poller.wakeups(), 0);
    }

    #[test]
    fn test_reports_only_ready_descriptors() {
        let quiet = UdpSocket::bind("127.0.0.1:0").unwrap();
        let busy = UdpSocket::bind("127.0.0.1:0").unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"x", busy.local_addr().unwrap()).unwrap();

        let quiet_id = SessionId::new(0, 0);
        let busy_id = SessionId::new(1, 0);
        let mut watched = WatchedSet::new();
        watched.push(Token::Session(quiet_id), quiet.as_fd());
        watched.push(Token::Session(busy_id), busy.as_fd());
        assert_eq!(watched.len(), 2);
        assert!(watched.contains(Token::Session(busy_id)));

        let mut poller = Poller::new();
        let ready = poller.wait(&watched, Duration::from_secs(2)).unwrap();
        assert_eq!(ready.len(), 1);
        assert!(ready.contains(Token::Session(busy_id)));
        assert!(!ready.contains(Token::Session(quiet_id)));
        assert_eq!(poller.wakeups(), 1);
    }

    #[test]
    fn test_ready_set_preserves_watched_order() {
        let a = UdpSocket::bind("127.0.0.1:0").unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"b", b.local_addr().unwrap()).unwrap();
        sender.send_to(b"a", a.local_addr().unwrap()).unwrap();

        let mut watched = WatchedSet::new();
        watched.push(Token::Listener, a.as_fd());
        watched.push(Token::Session(SessionId::new(0, 1)), b.as_fd());

        // Both may not be visible on the first wake; wait until they are.
        let mut poller = Poller::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        let ready = loop {
            let ready = poller.wait(&watched, Duration::from_millis(200)).unwrap();
            if ready.len() == 2 || Instant::now() > deadline {
                break ready;
            }
            std::thread::sleep(Duration::from_millis(5));
        };
        let order: Vec<Token> = ready.iter().collect();
        assert_eq!(
            order,
            vec![Token::Listener, Token::Session(SessionId::new(0, 1))]
        );
    }
}
