//! dtls-ping: smoke-test client for `dtls-server` running with
//! `DTLS_TRANSPORT=plain`.
//!
//! Usage:
//!     dtls-ping [addr] [message] [count]
//!
//! Performs the cleartext handshake, sends `message` `count` times (waiting
//! for the acknowledgment after each), then sends a close notification.

use std::net::{SocketAddr, UdpSocket};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use dtls_core::constants::{MSGLEN, SERV_PORT};
use dtls_module::plain::{client_handshake, BYE};

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn ping(server: SocketAddr, message: &str, count: usize) -> std::io::Result<()> {
    let bind: SocketAddr = if server.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind)?;
    socket.connect(server)?;
    socket.set_read_timeout(Some(Duration::from_secs(2)))?;

    let start = Instant::now();
    client_handshake(&socket)?;
    info!(%server, elapsed_us = start.elapsed().as_micros() as u64, "handshake complete");

    let mut buf = vec![0u8; MSGLEN];
    for seq in 0..count {
        let sent = Instant::now();
        socket.send(message.as_bytes())?;
        let n = socket.recv(&mut buf)?;
        info!(
            seq,
            rtt_us = sent.elapsed().as_micros() as u64,
            reply = %String::from_utf8_lossy(&buf[..n]),
            "ack"
        );
    }

    socket.send(BYE)?;
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .ok();

    let args: Vec<String> = std::env::args().collect();
    let server: SocketAddr = match args.get(1) {
        Some(s) => match s.parse() {
            Ok(addr) => addr,
            Err(e) => {
                error!(addr = %s, error = %e, "bad server address");
                return ExitCode::FAILURE;
            }
        },
        None => ([127, 0, 0, 1], SERV_PORT).into(),
    };
    let message = args.get(2).map(String::as_str).unwrap_or("hello");
    let count: usize = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(1);

    match ping(server, message, count) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(%server, error = %e, "ping failed");
            ExitCode::FAILURE
        }
    }
}
