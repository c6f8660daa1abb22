//! Session I/O driver.
//!
//! One readiness notification on an ESTABLISHED session gets exactly one
//! read. A record with payload is logged and answered with the fixed
//! acknowledgment. Would-block defers to the next notification without
//! replying. Any fatal read or write tears the session down; other sessions
//! never notice.

use std::time::Instant;

use dtls_core::session::{HandshakeState, SessionId};
use dtls_core::transport::SecureSession;

use tracing::{debug, info, trace, warn};

use crate::registry::SessionRegistry;
use crate::stats::Stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    /// Payload received and acknowledged.
    Replied { bytes: usize },
    /// Nothing to read yet; retry on the next notification.
    Deferred,
    /// Read failed fatally (including an orderly close by the peer).
    ClosedOnRead,
    /// Acknowledgment could not be written.
    ClosedOnWrite,
}

pub struct SessionDriver {
    buf: Box<[u8]>,
    ack: Vec<u8>,
}

impl SessionDriver {
    /// `max_datagram` bounds a record; one byte is held back so a payload
    /// can always be terminated by the reader.
    pub fn new(max_datagram: usize, ack: Vec<u8>) -> Self {
        Self {
            buf: vec![0u8; max_datagram.max(2)].into_boxed_slice(),
            ack,
        }
    }

    /// Largest payload a single read accepts.
    #[inline]
    pub fn max_payload(&self) -> usize {
        self.buf.len() - 1
    }

    /// Service one readiness notification for `id`.
    ///
    /// Returns `None` if `id` is not an ESTABLISHED session.
    pub fn service<S: SecureSession>(
        &mut self,
        registry: &mut SessionRegistry<S>,
        id: SessionId,
        stats: &mut Stats,
    ) -> Option<DriveOutcome> {
        let session = registry.get_mut(id)?;
        if session.state() != HandshakeState::Established {
            return None;
        }
        let peer = session.peer();
        let limit = self.max_payload();

        match session.transport_mut().read(&mut self.buf[..limit]) {
            Ok(0) => {
                trace!(session = %id, "empty record");
                Some(DriveOutcome::Deferred)
            }
            Ok(n) => {
                session.touch();
                stats.reads += 1;
                stats.bytes_in += n as u64;
                info!(session = %id, %peer, bytes = n, "heard payload");
                debug!(session = %id, payload = %String::from_utf8_lossy(&self.buf[..n]), "I heard this");

                match session.transport_mut().write(&self.ack) {
                    Ok(written) => {
                        stats.writes += 1;
                        stats.bytes_out += written as u64;
                        trace!(session = %id, bytes = written, "ack sent");
                        Some(DriveOutcome::Replied { bytes: n })
                    }
                    Err(e) => {
                        warn!(session = %id, %peer, error = %e, "write error, closing session");
                        stats.write_errors += 1;
                        self.teardown(registry, id, stats);
                        Some(DriveOutcome::ClosedOnWrite)
                    }
                }
            }
            Err(e) if e.is_would_block() => {
                trace!(session = %id, "read would block");
                Some(DriveOutcome::Deferred)
            }
            Err(e) => {
                info!(session = %id, %peer, error = %e, "lost connection to client");
                stats.read_errors += 1;
                self.teardown(registry, id, stats);
                Some(DriveOutcome::ClosedOnRead)
            }
        }
    }

    fn teardown<S: SecureSession>(
        &self,
        registry: &mut SessionRegistry<S>,
        id: SessionId,
        stats: &mut Stats,
    ) {
        let lived = registry
            .get(id)
            .map(|s| Instant::now().saturating_duration_since(s.created_at()));
        if let Some(peer) = registry.retire(id) {
            stats.closes += 1;
            debug!(session = %id, %peer, lived_ms = lived.map(|d| d.as_millis() as u64), "session closed");
        }
    }
}
