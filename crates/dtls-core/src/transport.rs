//! Secure-transport collaborator abstraction.
//!
//! The multiplexer never performs cryptography itself. Handshakes, record
//! encryption and certificate handling belong to a secure-transport library
//! that is driven through these two traits.
//!
//! # Implementors
//!
//! - `PlainTransport` (dtls-module, default): cleartext two-flight handshake
//!   with the same readiness behavior as DTLS. No certificates needed.
//!   Used by tests and by `dtls-ping` smoke runs.
//!
//! - `OpensslTransport` (dtls-module, feature = "openssl"): DTLS 1.2 via
//!   OpenSSL, one `Ssl` per peer over a connected [`PeerChannel`].
//!
//! Context and session teardown happen in `Drop`.

use std::io;

use thiserror::Error;

use crate::channel::PeerChannel;

/// How the multiplexer must react to a failed collaborator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Operation could not finish now; retry on the next readiness notification.
    WouldBlock,
    /// Session is unusable and must be torn down.
    Fatal,
}

/// Error reported by a secure session.
///
/// `code` is the collaborator's native error code (an OpenSSL `SSL_ERROR_*`
/// value, an errno, ...). Callers only ever branch on [`class`](Self::class).
#[derive(Debug, Error)]
#[error("{message} (code {code})")]
pub struct TransportError {
    class: ErrorClass,
    code: i32,
    message: String,
}

impl TransportError {
    pub fn would_block() -> Self {
        Self {
            class: ErrorClass::WouldBlock,
            code: 0,
            message: "operation would block".to_string(),
        }
    }

    pub fn fatal(code: i32, message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Fatal,
            code,
            message: message.into(),
        }
    }

    /// How the caller must react.
    #[inline]
    pub fn class(&self) -> ErrorClass {
        self.class
    }

    #[inline]
    pub fn is_would_block(&self) -> bool {
        self.class == ErrorClass::WouldBlock
    }

    #[inline]
    pub fn code(&self) -> i32 {
        self.code
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock => Self::would_block(),
            // A signal landed mid-call; nothing was lost, try again later.
            io::ErrorKind::Interrupted => Self::would_block(),
            _ => Self::fatal(e.raw_os_error().unwrap_or(-1), e.to_string()),
        }
    }
}

/// Factory for per-peer secure sessions (the collaborator's context).
///
/// One context is created at startup from the server configuration and
/// shared by every session. Creating the context is where certificates and
/// keys are loaded, so failures there are setup-fatal.
pub trait SecureContext {
    type Session: SecureSession;

    /// Create a session bound to `channel`.
    ///
    /// The session takes ownership of the channel; dropping the session
    /// closes the descriptor.
    fn new_session(&self, channel: PeerChannel) -> Result<Self::Session, TransportError>;
}

/// One peer's secure channel.
///
/// **Contract:** once `set_nonblocking(true)` has been called, no method may
/// block. Anything that cannot complete immediately reports
/// [`ErrorClass::WouldBlock`].
pub trait SecureSession {
    /// Toggle non-blocking mode on the session and its channel.
    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), TransportError>;

    /// Advance the server side of the handshake.
    ///
    /// `Ok(())` means the handshake is complete. A single call is not
    /// guaranteed to finish; callers invoke it again when the channel
    /// becomes readable.
    fn accept(&mut self) -> Result<(), TransportError>;

    /// Read and decrypt one record into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Encrypt and send `buf`.
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError>;

    /// Best-effort close notification to the peer.
    fn shutdown(&mut self);

    /// The underlying per-peer channel.
    fn channel(&self) -> &PeerChannel;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_would_block_classifies_as_retryable() {
        let e: TransportError = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert_eq!(e.class(), ErrorClass::WouldBlock);
        assert!(e.is_would_block());
    }

    #[test]
    fn test_io_failure_classifies_as_fatal() {
        let e: TransportError = io::Error::from_raw_os_error(111).into();
        assert_eq!(e.class(), ErrorClass::Fatal);
        assert_eq!(e.code(), 111);
    }

    #[test]
    fn test_display_includes_code() {
        let e = TransportError::fatal(1, "handshake failure");
        assert_eq!(e.to_string(), "handshake failure (code 1)");
    }
}
