//! `ListeningEndpoint`: the shared UDP port new peers arrive on.
//!
//! The endpoint is only used to *discover* peers. A pending datagram is
//! peeked (never consumed) to learn the sender's address. A fresh socket is
//! then bound to the same local address and `connect`ed to that sender, and
//! the peeked datagram is moved onto it. That socket becomes the peer's
//! private channel.
//!
//! The listening socket itself is never replaced, so datagrams other peers
//! queued behind the head stay on it and keep it readable until the pump
//! reaches them.
//!
//! Every socket is opened with `SO_REUSEADDR` so channels can bind the
//! listening address. The kernel prefers a connected socket for its peer's
//! traffic, so later datagrams from that peer bypass the listener.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};

use dtls_core::channel::PeerChannel;
use dtls_core::error::{Result, ServerError};

use nix::sys::socket::{
    bind, setsockopt, socket, sockopt, AddressFamily, SockFlag, SockType, SockaddrIn,
    SockaddrIn6,
};
use tracing::{debug, info, warn};

pub struct ListeningEndpoint {
    socket: UdpSocket,
    local: SocketAddr,
    peek_buf: Box<[u8]>,
    recv_buf: Box<[u8]>,
}

/// Largest UDP payload; the head datagram is moved onto its channel whole.
const MAX_UDP_PAYLOAD: usize = u16::MAX as usize;

impl ListeningEndpoint {
    /// Open the listening endpoint on `addr`.
    ///
    /// Port 0 binds an ephemeral port; peer channels reuse whatever port the
    /// kernel picked.
    pub fn bind(addr: SocketAddr, peek_len: usize) -> Result<Self> {
        let socket = open_socket(addr)?;
        let local = socket.local_addr().map_err(ServerError::Socket)?;
        info!(%local, "listening endpoint bound");
        Ok(Self {
            socket,
            local,
            peek_buf: vec![0u8; peek_len.max(1)].into_boxed_slice(),
            recv_buf: vec![0u8; MAX_UDP_PAYLOAD].into_boxed_slice(),
        })
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Peek at the head of the queue without removing it.
    ///
    /// Returns the sender and the (possibly truncated) peeked length, or
    /// `None` when nothing is pending.
    pub fn peek_peer(&mut self) -> io::Result<Option<(SocketAddr, usize)>> {
        match self.socket.peek_from(&mut self.peek_buf) {
            Ok((n, peer)) => Ok(Some((peer, n))),
            Err(e) if is_transient(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Consume and drop the datagram at the head of the queue.
    pub fn discard(&mut self) -> io::Result<()> {
        match self.socket.recv_from(&mut self.peek_buf) {
            Ok((n, peer)) => {
                debug!(%peer, bytes = n, "discarded datagram on listening endpoint");
                Ok(())
            }
            Err(e) if is_transient(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Open a channel connected to `peer` and move the head datagram onto it.
    ///
    /// If the channel cannot be opened the head datagram is dropped, so only
    /// this peer is lost (it will retransmit) and the rest of the queue is
    /// untouched either way.
    pub fn detach(&mut self, peer: SocketAddr) -> Option<PeerChannel> {
        let channel = match open_socket(self.local)
            .and_then(|socket| PeerChannel::connect(socket, peer).map_err(ServerError::Socket))
        {
            Ok(channel) => channel,
            Err(e) => {
                warn!(%peer, error = %e, "cannot open peer channel");
                if let Err(e) = self.discard() {
                    warn!(%peer, error = %e, "could not drop datagram");
                }
                return None;
            }
        };

        match self.socket.recv_from(&mut self.recv_buf) {
            Ok((n, from)) if from == peer => {
                debug!(%peer, fd = channel.as_raw_fd(), bytes = n, "peer channel detached");
                Some(channel.with_first(self.recv_buf[..n].into()))
            }
            Ok((_, from)) => {
                warn!(%peer, %from, "queue head changed sender, dropped");
                Some(channel)
            }
            Err(e) => {
                warn!(%peer, error = %e, "queue head vanished");
                Some(channel)
            }
        }
    }
}

impl AsFd for ListeningEndpoint {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Non-blocking, close-on-exec UDP socket with `SO_REUSEADDR`, bound to `addr`.
fn open_socket(addr: SocketAddr) -> Result<UdpSocket> {
    let family = match addr {
        SocketAddr::V4(_) => AddressFamily::Inet,
        SocketAddr::V6(_) => AddressFamily::Inet6,
    };
    let fd = socket(
        family,
        SockType::Datagram,
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        None,
    )
    .map_err(|e| ServerError::Socket(e.into()))?;

    setsockopt(&fd, sockopt::ReuseAddr, &true).map_err(|e| ServerError::Socket(e.into()))?;

    let bound = match addr {
        SocketAddr::V4(v4) => bind(fd.as_raw_fd(), &SockaddrIn::from(v4)),
        SocketAddr::V6(v6) => bind(fd.as_raw_fd(), &SockaddrIn6::from(v6)),
    };
    bound.map_err(|e| ServerError::Bind {
        addr,
        source: e.into(),
    })?;

    Ok(UdpSocket::from(fd))
}
