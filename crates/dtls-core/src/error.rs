//! Server error types.
//!
//! Only two kinds of failure ever tear the whole server down: setup failures
//! (socket, bind, secure context, credentials) and a failing readiness wait.
//! Everything that goes wrong inside a single session is a
//! [`TransportError`](crate::transport::TransportError) and stays local to
//! that session.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Datagram socket could not be created or configured.
    #[error("cannot create socket: {0}")]
    Socket(#[source] io::Error),

    /// Binding the listening endpoint failed.
    #[error("bind to {addr} failed: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The secure-transport context could not be created.
    #[error("secure context setup failed: {0}")]
    Context(String),

    /// A certificate, key or CA bundle could not be loaded.
    #[error("cannot load {what} from {}: {reason}", .path.display())]
    Credentials {
        what: &'static str,
        path: PathBuf,
        reason: String,
    },

    /// The readiness wait itself failed.
    #[error("readiness wait failed: {0}")]
    Multiplexer(#[source] io::Error),

    /// Installing the shutdown signal handler failed.
    #[error("signal setup failed: {0}")]
    Signal(#[source] io::Error),

    /// Configuration rejected by `ServerConfig::validate`.
    #[error("invalid configuration: {0}")]
    Config(&'static str),
}

impl ServerError {
    /// Whether this error ended the accept loop (as opposed to setup).
    pub fn is_multiplexer(&self) -> bool {
        matches!(self, Self::Multiplexer(_))
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = ServerError::Config("port must not be 0");
        assert_eq!(e.to_string(), "invalid configuration: port must not be 0");

        let e = ServerError::Credentials {
            what: "private key",
            path: PathBuf::from("/tmp/key.pem"),
            reason: "no such file".into(),
        };
        assert_eq!(
            e.to_string(),
            "cannot load private key from /tmp/key.pem: no such file"
        );
    }

    #[test]
    fn test_multiplexer_classification() {
        let e = ServerError::Multiplexer(io::Error::new(io::ErrorKind::Other, "EBADF"));
        assert!(e.is_multiplexer());
        assert!(!ServerError::Config("x").is_multiplexer());
    }
}
