//! Server configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    ACK, DEFAULT_MAX_SESSIONS, DEFAULT_MTU, IDLE_TIMEOUT, MSGLEN, PEEK_LEN, SERV_PORT,
};
use crate::env::{env_get, env_get_opt};
use crate::error::{Result, ServerError};

/// Credential material handed to the secure-transport context
///
/// Paths are opaque to the multiplexer; only the collaborator opens them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// CA bundle used to verify peers (optional)
    pub ca_file: Option<PathBuf>,

    /// Server certificate chain (PEM)
    pub cert_file: PathBuf,

    /// Server private key (PEM)
    pub key_file: PathBuf,

    /// Cipher list override, in the collaborator's syntax
    pub cipher_list: Option<String>,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            ca_file: Some(PathBuf::from("../certs/ca-cert.pem")),
            cert_file: PathBuf::from("../certs/server-cert.pem"),
            key_file: PathBuf::from("../certs/server-key.pem"),
            cipher_list: None,
        }
    }
}

/// Configuration for the server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Local address of the listening endpoint
    pub bind_addr: IpAddr,

    /// Well-known UDP port (0 picks an ephemeral port)
    pub port: u16,

    /// Longest the multiplexer may block with nothing ready (default: 5 min)
    pub idle_timeout: Duration,

    /// Read buffer size; one byte is held back, so payloads are < this
    pub max_datagram: usize,

    /// Bytes peeked off the listening endpoint to discover a peer
    pub peek_len: usize,

    /// Acknowledgment written after every successful read
    pub ack: Vec<u8>,

    /// Sessions tracked at once before new peers are refused
    pub max_sessions: usize,

    /// Path MTU handed to the secure-transport library
    pub mtu: u32,

    /// Certificates and keys for the secure-transport context
    pub credentials: Credentials,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: SERV_PORT,
            idle_timeout: IDLE_TIMEOUT,
            max_datagram: MSGLEN,
            peek_len: PEEK_LEN,
            ack: ACK.to_vec(),
            max_sessions: DEFAULT_MAX_SESSIONS,
            mtu: DEFAULT_MTU,
            credentials: Credentials::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `DTLS_*` environment variables
    ///
    /// | Variable                  | Field              |
    /// |---------------------------|--------------------|
    /// | `DTLS_BIND`               | `bind_addr`        |
    /// | `DTLS_PORT`               | `port`             |
    /// | `DTLS_IDLE_TIMEOUT_SECS`  | `idle_timeout`     |
    /// | `DTLS_MAX_SESSIONS`       | `max_sessions`     |
    /// | `DTLS_MTU`                | `mtu`              |
    /// | `DTLS_ACK`                | `ack`              |
    /// | `DTLS_CA_FILE`            | `credentials.ca_file` |
    /// | `DTLS_CERT_FILE`          | `credentials.cert_file` |
    /// | `DTLS_KEY_FILE`           | `credentials.key_file` |
    /// | `DTLS_CIPHER_LIST`        | `credentials.cipher_list` |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut credentials = defaults.credentials.clone();
        if let Some(ca) = env_get_opt::<PathBuf>("DTLS_CA_FILE") {
            credentials.ca_file = Some(ca);
        }
        credentials.cert_file = env_get("DTLS_CERT_FILE", credentials.cert_file);
        credentials.key_file = env_get("DTLS_KEY_FILE", credentials.key_file);
        credentials.cipher_list = env_get_opt("DTLS_CIPHER_LIST");

        Self {
            bind_addr: env_get("DTLS_BIND", defaults.bind_addr),
            port: env_get("DTLS_PORT", defaults.port),
            idle_timeout: env_get_opt("DTLS_IDLE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            max_sessions: env_get("DTLS_MAX_SESSIONS", defaults.max_sessions),
            mtu: env_get("DTLS_MTU", defaults.mtu),
            ack: env_get_opt::<String>("DTLS_ACK")
                .map(String::into_bytes)
                .unwrap_or(defaults.ack),
            credentials,
            ..defaults
        }
    }

    /// Socket address of the listening endpoint
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Set the listening address
    pub fn bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the listening port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the multiplexer idle timeout
    pub fn idle_timeout(mut self, d: Duration) -> Self {
        self.idle_timeout = d;
        self
    }

    /// Set the read buffer size
    pub fn max_datagram(mut self, n: usize) -> Self {
        self.max_datagram = n;
        self
    }

    /// Set the acknowledgment payload
    pub fn ack(mut self, ack: impl Into<Vec<u8>>) -> Self {
        self.ack = ack.into();
        self
    }

    /// Set the concurrent session cap
    pub fn max_sessions(mut self, n: usize) -> Self {
        self.max_sessions = n;
        self
    }

    /// Set the credential material
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_datagram < 2 {
            return Err(ServerError::Config("max_datagram must be at least 2"));
        }
        if self.peek_len == 0 {
            return Err(ServerError::Config("peek_len must be at least 1"));
        }
        if self.ack.is_empty() {
            return Err(ServerError::Config("ack must not be empty"));
        }
        if self.ack.len() > self.max_datagram {
            return Err(ServerError::Config("ack does not fit in one datagram"));
        }
        if self.max_sessions == 0 {
            return Err(ServerError::Config("max_sessions must be at least 1"));
        }
        if self.idle_timeout.is_zero() {
            return Err(ServerError::Config("idle_timeout must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_wire_behavior() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 11111);
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.max_datagram, 4096);
        assert_eq!(config.peek_len, 1500);
        assert_eq!(config.ack, b"I hear you fashizzle!");
        assert_eq!(config.listen_addr(), "0.0.0.0:11111".parse().unwrap());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::new()
            .bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .port(0)
            .idle_timeout(Duration::from_millis(250))
            .ack(&b"ok"[..])
            .max_sessions(4);
        assert_eq!(config.listen_addr(), "127.0.0.1:0".parse().unwrap());
        assert_eq!(config.ack, b"ok");
        assert_eq!(config.max_sessions, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects() {
        assert!(ServerConfig::new().max_sessions(0).validate().is_err());
        assert!(ServerConfig::new().ack(Vec::new()).validate().is_err());
        assert!(ServerConfig::new().max_datagram(1).validate().is_err());
        assert!(ServerConfig::new()
            .idle_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ServerConfig::new()
            .max_datagram(8)
            .ack(&b"longer than eight"[..])
            .validate()
            .is_err());
    }

    #[test]
    fn test_from_env_overlay() {
        std::env::set_var("DTLS_PORT", "22222");
        std::env::set_var("DTLS_IDLE_TIMEOUT_SECS", "30");
        std::env::set_var("DTLS_CIPHER_LIST", "ECDHE-ECDSA-AES128-GCM-SHA256");
        let config = ServerConfig::from_env();
        std::env::remove_var("DTLS_PORT");
        std::env::remove_var("DTLS_IDLE_TIMEOUT_SECS");
        std::env::remove_var("DTLS_CIPHER_LIST");

        assert_eq!(config.port, 22222);
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(
            config.credentials.cipher_list.as_deref(),
            Some("ECDHE-ECDSA-AES128-GCM-SHA256")
        );
        assert_eq!(config.max_datagram, 4096);
    }
}
