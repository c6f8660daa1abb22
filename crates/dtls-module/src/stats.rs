//! Server counters, logged on idle timeout and at shutdown.

use std::time::Duration;

use tracing::info;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Stats {
    /// Peers discovered on the listening endpoint
    pub accepts: u64,
    /// Handshakes that reached ESTABLISHED
    pub handshakes: u64,
    /// Handshakes that failed fatally
    pub handshake_failures: u64,
    /// Peers turned away (capacity, duplicate, session creation failure)
    pub refused: u64,
    /// Successful reads with payload
    pub reads: u64,
    /// Acknowledgments written
    pub writes: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub read_errors: u64,
    pub write_errors: u64,
    /// Sessions torn down (any reason)
    pub closes: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self, sessions: usize, uptime: Duration) {
        info!(
            uptime_secs = uptime.as_secs(),
            sessions,
            accepts = self.accepts,
            handshakes = self.handshakes,
            handshake_failures = self.handshake_failures,
            refused = self.refused,
            reads = self.reads,
            writes = self.writes,
            bytes_in = self.bytes_in,
            bytes_out = self.bytes_out,
            read_errors = self.read_errors,
            write_errors = self.write_errors,
            closes = self.closes,
            "stats"
        );
    }
}
