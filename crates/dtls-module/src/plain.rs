//! Cleartext transport.
//!
//! Behaves like DTLS as far as the multiplexer can tell: a two-flight
//! handshake that never completes in a single `accept`, would-block on an
//! empty channel, and an explicit close notification. Records travel
//! unencrypted, so it needs no certificates.
//!
//! ```text
//! client                server
//!   HELLO        ->
//!               <-   VERIFY          (accept: would block)
//!   HELLO VERIFY ->
//!               <-   WELCOME         (accept: done)
//!   payload      ->
//!               <-   ack
//!   BYE          ->                  (read: fatal, peer closed)
//! ```

use std::io;
use std::net::UdpSocket;

use dtls_core::channel::PeerChannel;
use dtls_core::config::ServerConfig;
use dtls_core::error::Result;
use dtls_core::transport::{SecureContext, SecureSession, TransportError};

/// Client's opening flight.
pub const HELLO: &[u8] = b"HELLO";
/// Server's challenge; the client must echo [`HELLO_VERIFIED`].
pub const VERIFY: &[u8] = b"VERIFY";
pub const HELLO_VERIFIED: &[u8] = b"HELLO VERIFY";
/// Server's final flight.
pub const WELCOME: &[u8] = b"WELCOME";
/// Close notification, either direction.
pub const BYE: &[u8] = b"BYE";

#[derive(Debug, Clone)]
pub struct PlainTransport {
    max_record: usize,
}

impl PlainTransport {
    pub fn context(config: &ServerConfig) -> Result<Self> {
        Ok(Self {
            max_record: config.max_datagram,
        })
    }
}

impl SecureContext for PlainTransport {
    type Session = PlainSession;

    fn new_session(&self, channel: PeerChannel) -> std::result::Result<PlainSession, TransportError> {
        Ok(PlainSession {
            channel,
            phase: Phase::AwaitHello,
            scratch: vec![0u8; self.max_record].into_boxed_slice(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitHello,
    AwaitVerified,
    Open,
    Closed,
}

#[derive(Debug)]
pub struct PlainSession {
    channel: PeerChannel,
    phase: Phase,
    scratch: Box<[u8]>,
}

impl PlainSession {
    fn recv_flight(&mut self) -> std::result::Result<usize, TransportError> {
        Ok(self.channel.recv(&mut self.scratch)?)
    }

    fn unexpected(&mut self, n: usize) -> TransportError {
        self.phase = Phase::Closed;
        TransportError::fatal(
            libc::EPROTO,
            format!(
                "unexpected handshake record {:?}",
                String::from_utf8_lossy(&self.scratch[..n])
            ),
        )
    }
}

impl SecureSession for PlainSession {
    fn set_nonblocking(&mut self, nonblocking: bool) -> std::result::Result<(), TransportError> {
        Ok(self.channel.set_nonblocking(nonblocking)?)
    }

    fn accept(&mut self) -> std::result::Result<(), TransportError> {
        match self.phase {
            Phase::Open => Ok(()),
            Phase::Closed => Err(TransportError::fatal(libc::EPIPE, "session closed")),
            Phase::AwaitHello => {
                let n = self.recv_flight()?;
                if &self.scratch[..n] != HELLO {
                    return Err(self.unexpected(n));
                }
                self.channel.send(VERIFY)?;
                self.phase = Phase::AwaitVerified;
                Err(TransportError::would_block())
            }
            Phase::AwaitVerified => {
                let n = self.recv_flight()?;
                match &self.scratch[..n] {
                    flight if flight == HELLO_VERIFIED => {
                        self.channel.send(WELCOME)?;
                        self.phase = Phase::Open;
                        Ok(())
                    }
                    // Our VERIFY was lost and the client retransmitted.
                    flight if flight == HELLO => {
                        self.channel.send(VERIFY)?;
                        Err(TransportError::would_block())
                    }
                    _ => Err(self.unexpected(n)),
                }
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, TransportError> {
        if self.phase != Phase::Open {
            return Err(TransportError::fatal(libc::ENOTCONN, "handshake not complete"));
        }
        let n = self.channel.recv(buf)?;
        if &buf[..n] == BYE {
            self.phase = Phase::Closed;
            return Err(TransportError::fatal(0, "peer sent close notify"));
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> std::result::Result<usize, TransportError> {
        if self.phase != Phase::Open {
            return Err(TransportError::fatal(libc::ENOTCONN, "handshake not complete"));
        }
        Ok(self.channel.send(buf)?)
    }

    fn shutdown(&mut self) {
        if self.phase == Phase::Open {
            let _ = self.channel.send(BYE);
        }
        self.phase = Phase::Closed;
    }

    fn channel(&self) -> &PeerChannel {
        &self.channel
    }
}

/// Client side of the handshake over a socket connected to the server.
///
/// Blocks for each flight, bounded by the socket's read timeout.
pub fn client_handshake(socket: &UdpSocket) -> io::Result<()> {
    let mut buf = [0u8; 64];

    socket.send(HELLO)?;
    let n = socket.recv(&mut buf)?;
    if &buf[..n] != VERIFY {
        return Err(protocol_error("VERIFY", &buf[..n]));
    }

    socket.send(HELLO_VERIFIED)?;
    let n = socket.recv(&mut buf)?;
    if &buf[..n] != WELCOME {
        return Err(protocol_error("WELCOME", &buf[..n]));
    }
    Ok(())
}

fn protocol_error(wanted: &str, got: &[u8]) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("expected {wanted}, got {:?}", String::from_utf8_lossy(got)),
    )
}
