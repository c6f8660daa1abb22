//! # dtls-core: Trait definitions for the DTLS session multiplexer
//!
//! This crate defines the boundary between the multiplexing engine and the
//! secure-transport library that does the actual cryptography. The engine
//! (in `dtls-module`) depends only on the traits and types here, never on a
//! concrete DTLS implementation.
//!
//! ## Modules
//!
//! - `transport` - Secure-transport collaborator traits and error classification
//! - `channel` - Per-peer datagram channel handed to a secure session
//! - `session` - Session identifiers and the handshake state machine
//! - `config` - Server configuration object
//! - `cancel` - Cancellation token for cooperative shutdown
//! - `error` - Setup-fatal and multiplexer-fatal error types
//! - `env` - Environment variable utilities

pub mod transport;
pub mod channel;
pub mod session;
pub mod config;
pub mod cancel;
pub mod error;
pub mod env;

// Re-exports for convenience
pub use transport::{ErrorClass, SecureContext, SecureSession, TransportError};
pub use channel::PeerChannel;
pub use session::{HandshakeState, InvalidTransition, SessionId};
pub use config::{Credentials, ServerConfig};
pub use cancel::CancellationToken;
pub use error::{Result, ServerError};
pub use env::{env_get, env_get_opt, env_get_str};

/// Default wire behavior
pub mod constants {
    use std::time::Duration;

    /// Well-known UDP port the server listens on
    pub const SERV_PORT: u16 = 11111;

    /// Maximum datagram accepted per read (one byte is kept in reserve)
    pub const MSGLEN: usize = 4096;

    /// Buffer used to peek at a pending handshake datagram
    pub const PEEK_LEN: usize = 1500;

    /// How long the multiplexer may sit with nothing ready
    pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

    /// Fixed acknowledgment sent after every successful read
    pub const ACK: &[u8] = b"I hear you fashizzle!";

    /// Default cap on concurrently tracked sessions
    pub const DEFAULT_MAX_SESSIONS: usize = 1024;

    /// Path MTU handed to the secure-transport library
    pub const DEFAULT_MTU: u32 = 1400;
}
