//! Per-peer datagram channel.
//!
//! A `PeerChannel` is a UDP socket that has been `connect`ed to exactly one
//! peer. The kernel routes that peer's datagrams to it instead of to the
//! listening endpoint, which is what isolates sessions from each other on a
//! connectionless transport.
//!
//! The peer's first datagram arrives on the listening endpoint, before the
//! channel exists. The endpoint moves it onto the channel with
//! [`PeerChannel::with_first`], and `recv` serves it before touching the
//! socket.
//!
//! A datagram from another source can still land on the socket in the short
//! window between `bind` and `connect`. `recv` drops it, so a session only
//! ever sees its own peer's records.

use std::cell::Cell;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, UdpSocket};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

pub struct PeerChannel {
    socket: UdpSocket,
    peer: SocketAddr,
    first: Cell<Option<Box<[u8]>>>,
}

impl PeerChannel {
    /// Wrap a socket already connected to `peer`.
    pub fn new(socket: UdpSocket, peer: SocketAddr) -> Self {
        Self {
            socket,
            peer,
            first: Cell::new(None),
        }
    }

    /// Connect `socket` to `peer` and wrap it.
    pub fn connect(socket: UdpSocket, peer: SocketAddr) -> io::Result<Self> {
        socket.connect(peer)?;
        Ok(Self::new(socket, peer))
    }

    /// Queue a datagram that was received elsewhere on the peer's behalf.
    /// The next `recv` returns it.
    pub fn with_first(self, datagram: Box<[u8]>) -> Self {
        self.first.set(Some(datagram));
        self
    }

    /// Whether a handed-over datagram is still waiting to be read.
    pub fn has_pending(&self) -> bool {
        let first = self.first.take();
        let pending = first.is_some();
        self.first.set(first);
        pending
    }

    #[inline]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.socket.set_nonblocking(nonblocking)
    }

    /// Receive one datagram from the bound peer.
    ///
    /// A handed-over datagram comes first, truncated to `buf` like any
    /// other. Stray datagrams from other sources are discarded.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(first) = self.first.take() {
            let n = first.len().min(buf.len());
            buf[..n].copy_from_slice(&first[..n]);
            return Ok(n);
        }
        loop {
            let (n, from) = self.socket.recv_from(buf)?;
            if from == self.peer {
                return Ok(n);
            }
        }
    }

    /// Send one datagram to the bound peer.
    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf)
    }
}

impl fmt::Debug for PeerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerChannel")
            .field("fd", &self.socket.as_raw_fd())
            .field("peer", &self.peer)
            .field("pending", &self.has_pending())
            .finish()
    }
}

impl AsFd for PeerChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

impl AsRawFd for PeerChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

// Datagram-preserving stream adapter: every read is one datagram and every
// write is one datagram. This is the shape record-layer libraries expect
// from a DTLS transport.
impl Read for PeerChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv(buf)
    }
}

impl Write for PeerChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
