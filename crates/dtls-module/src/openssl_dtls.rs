//! DTLS collaborator backed by OpenSSL.
//!
//! One `SslContext` holds the server's certificate, key, and trusted CAs and
//! is shared by every session. Each peer gets its own `Ssl` running over its
//! connected [`PeerChannel`]; the channel's `Read`/`Write` impls move exactly
//! one datagram per call, which is what the DTLS record layer expects.
//!
//! OpenSSL reports a non-blocking channel's `EAGAIN` as `WANT_READ` or
//! `WANT_WRITE`. Both map to would-block; every other error code is fatal.

use std::path::Path;

use dtls_core::channel::PeerChannel;
use dtls_core::config::ServerConfig;
use dtls_core::error::{Result, ServerError};
use dtls_core::transport::{SecureContext, SecureSession, TransportError};

use openssl::error::ErrorStack;
use openssl::ssl::{self, ErrorCode, Ssl, SslContext, SslContextBuilder, SslFiletype, SslMethod, SslStream};
use tracing::{debug, info};

pub struct OpensslTransport {
    ctx: SslContext,
    mtu: u32,
}

impl OpensslTransport {
    /// Build the shared DTLS context from `config.credentials`.
    ///
    /// Unreadable or mismatched credentials are setup-fatal.
    pub fn context(config: &ServerConfig) -> Result<Self> {
        let creds = &config.credentials;
        let mut builder = SslContextBuilder::new(SslMethod::dtls()).map_err(context_error)?;
        debug!("DTLS context created");

        if let Some(ca) = &creds.ca_file {
            builder
                .set_ca_file(ca)
                .map_err(|e| credentials_error("CA certificates", ca, e))?;
            info!(path = %ca.display(), "loaded CA certificates");
        }
        builder
            .set_certificate_chain_file(&creds.cert_file)
            .map_err(|e| credentials_error("server certificate", &creds.cert_file, e))?;
        builder
            .set_private_key_file(&creds.key_file, SslFiletype::PEM)
            .map_err(|e| credentials_error("server key", &creds.key_file, e))?;
        builder
            .check_private_key()
            .map_err(|e| credentials_error("server key", &creds.key_file, e))?;
        if let Some(ciphers) = &creds.cipher_list {
            builder.set_cipher_list(ciphers).map_err(context_error)?;
        }
        info!(
            cert = %creds.cert_file.display(),
            key = %creds.key_file.display(),
            "loaded server credentials"
        );

        Ok(Self {
            ctx: builder.build(),
            mtu: config.mtu,
        })
    }
}

impl SecureContext for OpensslTransport {
    type Session = OpensslSession;

    fn new_session(&self, channel: PeerChannel) -> std::result::Result<OpensslSession, TransportError> {
        let mut ssl = Ssl::new(&self.ctx).map_err(stack_error)?;
        ssl.set_mtu(self.mtu).map_err(stack_error)?;
        let stream = SslStream::new(ssl, channel).map_err(stack_error)?;
        Ok(OpensslSession { stream })
    }
}

pub struct OpensslSession {
    stream: SslStream<PeerChannel>,
}

impl SecureSession for OpensslSession {
    fn set_nonblocking(&mut self, nonblocking: bool) -> std::result::Result<(), TransportError> {
        Ok(self.stream.get_ref().set_nonblocking(nonblocking)?)
    }

    fn accept(&mut self) -> std::result::Result<(), TransportError> {
        self.stream.accept().map_err(classify)
    }

    fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, TransportError> {
        self.stream.ssl_read(buf).map_err(classify)
    }

    fn write(&mut self, buf: &[u8]) -> std::result::Result<usize, TransportError> {
        self.stream.ssl_write(buf).map_err(classify)
    }

    fn shutdown(&mut self) {
        // close_notify only; never wait for the peer's reply.
        let _ = self.stream.shutdown();
    }

    fn channel(&self) -> &PeerChannel {
        self.stream.get_ref()
    }
}

fn classify(e: ssl::Error) -> TransportError {
    let code = e.code();
    if code == ErrorCode::WANT_READ || code == ErrorCode::WANT_WRITE {
        return TransportError::would_block();
    }
    if let Some(io) = e.io_error() {
        if io.kind() == std::io::ErrorKind::WouldBlock {
            return TransportError::would_block();
        }
    }
    TransportError::fatal(code.as_raw(), e.to_string())
}

fn stack_error(e: ErrorStack) -> TransportError {
    TransportError::fatal(ssl::ErrorCode::SSL.as_raw(), e.to_string())
}

fn context_error(e: ErrorStack) -> ServerError {
    ServerError::Context(e.to_string())
}

fn credentials_error(what: &'static str, path: &Path, e: ErrorStack) -> ServerError {
    ServerError::Credentials {
        what,
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}
