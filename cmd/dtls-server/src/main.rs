//! DTLS Server
//!
//! Serves any number of DTLS peers on one UDP port from a single thread.
//! Every record a peer sends is logged and answered with a fixed
//! acknowledgment. SIGINT or SIGTERM closes every session and exits 0.
//!
//! Usage:
//!     cargo build --release -p dtls-server --features openssl
//!     ./target/release/dtls-server
//!
//! Environment (see `ServerConfig::from_env` for the full list):
//!     DTLS_PORT=11111                   listening port
//!     DTLS_CERT_FILE / DTLS_KEY_FILE    PEM credentials
//!     DTLS_CA_FILE                      trusted CAs
//!     DTLS_TRANSPORT=dtls|plain         `plain` needs no certificates;
//!                                       defaults to `dtls` when built with
//!                                       the `openssl` feature, else `plain`
//!     DTLS_LOG_LEVEL=info               used when RUST_LOG is unset
//!
//! Test with:
//!     DTLS_TRANSPORT=plain ./target/release/dtls-server &
//!     ./target/release/dtls-ping 127.0.0.1:11111 "hello"

use std::process::ExitCode;

use dtls_core::error::{Result, ServerError};
use dtls_core::{env_get_str, CancellationToken, SecureContext, ServerConfig};
use dtls_module::{signal, PlainTransport, Server, ShutdownReport};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Transport used when `DTLS_TRANSPORT` is unset: the best one compiled in.
#[cfg(feature = "openssl")]
const DEFAULT_TRANSPORT: &str = "dtls";
#[cfg(not(feature = "openssl"))]
const DEFAULT_TRANSPORT: &str = "plain";

fn init_tracing() {
    let level = env_get_str("DTLS_LOG_LEVEL", "info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init()
        .ok();
}

fn serve<C: SecureContext>(
    config: ServerConfig,
    context: C,
    token: CancellationToken,
) -> Result<ShutdownReport> {
    Server::bind(config, context, token)?.run()
}

#[cfg(feature = "openssl")]
fn serve_dtls(config: ServerConfig, token: CancellationToken) -> Result<ShutdownReport> {
    let context = dtls_module::OpensslTransport::context(&config)?;
    serve(config, context, token)
}

#[cfg(not(feature = "openssl"))]
fn serve_dtls(_config: ServerConfig, _token: CancellationToken) -> Result<ShutdownReport> {
    Err(ServerError::Context(
        "built without the `openssl` feature; rebuild with it or set DTLS_TRANSPORT=plain"
            .to_string(),
    ))
}

fn main() -> ExitCode {
    init_tracing();

    let config = ServerConfig::from_env();
    let token = CancellationToken::new();
    if let Err(e) = signal::install(&token) {
        error!(error = %e, "cannot install signal handlers");
        return ExitCode::FAILURE;
    }

    let transport = env_get_str("DTLS_TRANSPORT", DEFAULT_TRANSPORT);
    if transport == "plain" {
        warn!("cleartext transport selected, records are not encrypted");
    }
    info!(
        %transport,
        addr = %config.listen_addr(),
        pid = std::process::id(),
        "dtls-server starting"
    );

    let result = match transport.as_str() {
        "plain" => PlainTransport::context(&config).and_then(|ctx| serve(config, ctx, token)),
        "dtls" => serve_dtls(config, token),
        other => Err(ServerError::Config(if other.is_empty() {
            "DTLS_TRANSPORT is empty"
        } else {
            "DTLS_TRANSPORT must be `dtls` or `plain`"
        })),
    };

    match result {
        Ok(report) => {
            info!(
                sessions_closed = report.sessions_closed,
                handshakes = report.stats.handshakes,
                uptime_secs = report.uptime.as_secs(),
                "dtls-server done"
            );
            ExitCode::SUCCESS
        }
        Err(e) if e.is_multiplexer() => {
            error!(error = %e, "readiness wait failed, sessions closed");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "setup failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_transport_is_compiled_in() {
        assert_eq!(DEFAULT_TRANSPORT == "dtls", cfg!(feature = "openssl"));
        assert!(DEFAULT_TRANSPORT == "dtls" || DEFAULT_TRANSPORT == "plain");
    }
}
