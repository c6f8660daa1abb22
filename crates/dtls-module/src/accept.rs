//! Accept pump: turns datagrams on the listening endpoint into sessions.
//!
//! When the listening endpoint is readable the pump:
//! 1. Peeks the head datagram to learn the sender (without consuming it)
//! 2. Detaches a per-peer channel connected to that sender, moving the head
//!    datagram onto it
//! 3. Wraps the channel in a fresh secure session (one per peer, never
//!    reused) and registers it as PENDING
//! 4. Invokes handshake-accept exactly once
//!
//! One datagram is taken per notification. Datagrams queued behind it keep
//! the endpoint readable, so the next cycle takes the next one.
//!
//! A handshake rarely completes in one call. The PENDING session stays in
//! the watched set, and each later readiness notification on its channel
//! gets exactly one more `advance`.

use std::net::SocketAddr;

use dtls_core::session::{HandshakeState, SessionId};
use dtls_core::transport::{SecureContext, SecureSession};

use tracing::{debug, info, trace, warn};

use crate::endpoint::ListeningEndpoint;
use crate::registry::SessionRegistry;
use crate::stats::Stats;

/// Result of one listening-endpoint readiness notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Nothing pending; the normal idle case.
    Idle,
    /// Datagram consumed without creating a session (empty, or from a peer
    /// that already has one).
    Discarded,
    /// Peer turned away: capacity reached or session creation failed.
    Refused(SocketAddr),
    /// Session created and its first handshake step taken.
    Handshake(SessionId, HandshakeOutcome),
}

/// Result of one handshake-accept invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Would block; retry on the next readiness notification.
    Pending,
    /// Session moved to ESTABLISHED.
    Established,
    /// Fatal failure; the session has been destroyed.
    Failed,
}

#[derive(Debug, Default)]
pub struct AcceptPump;

impl AcceptPump {
    pub fn new() -> Self {
        Self
    }

    /// Service a readable listening endpoint.
    ///
    /// Every per-peer problem is absorbed here; the endpoint itself is never
    /// replaced, so nothing in this step can end the loop.
    pub fn pump<C: SecureContext>(
        &mut self,
        endpoint: &mut ListeningEndpoint,
        context: &C,
        registry: &mut SessionRegistry<C::Session>,
        stats: &mut Stats,
    ) -> AcceptOutcome {
        let (peer, peeked) = match endpoint.peek_peer() {
            Ok(Some(found)) => found,
            Ok(None) => {
                trace!("no clients in queue");
                return AcceptOutcome::Idle;
            }
            Err(e) => {
                warn!(error = %e, "peek on listening endpoint failed");
                if let Err(e) = endpoint.discard() {
                    warn!(error = %e, "could not drop unreadable datagram");
                }
                return AcceptOutcome::Discarded;
            }
        };

        if peeked == 0 {
            debug!(%peer, "empty datagram on listening endpoint");
            self.discard(endpoint);
            return AcceptOutcome::Discarded;
        }

        // Raced past its own channel before the kernel started routing to it.
        if let Some(existing) = registry.find_peer(peer) {
            debug!(%peer, session = %existing, "straggler for bound peer");
            self.discard(endpoint);
            return AcceptOutcome::Discarded;
        }

        if registry.is_full() {
            warn!(%peer, capacity = registry.capacity(), "session limit reached, refusing peer");
            self.discard(endpoint);
            stats.refused += 1;
            return AcceptOutcome::Refused(peer);
        }

        stats.accepts += 1;
        let Some(channel) = endpoint.detach(peer) else {
            stats.refused += 1;
            return AcceptOutcome::Refused(peer);
        };

        let mut session = match context.new_session(channel) {
            Ok(session) => session,
            Err(e) => {
                warn!(%peer, error = %e, "secure session creation failed");
                stats.refused += 1;
                return AcceptOutcome::Refused(peer);
            }
        };
        if let Err(e) = session.set_nonblocking(true) {
            warn!(%peer, error = %e, "cannot make session non-blocking");
            stats.refused += 1;
            return AcceptOutcome::Refused(peer);
        }

        let id = match registry.insert(session, peer) {
            Ok(id) => id,
            Err(_session) => {
                stats.refused += 1;
                return AcceptOutcome::Refused(peer);
            }
        };
        info!(session = %id, %peer, "new peer");

        // The peeked datagram now sits on the channel; this first step
        // consumes it.
        let outcome = self.advance(registry, id, stats).unwrap_or(HandshakeOutcome::Failed);
        AcceptOutcome::Handshake(id, outcome)
    }

    /// Invoke handshake-accept once for a PENDING session.
    ///
    /// Returns `None` if `id` is not a PENDING session.
    pub fn advance<S: SecureSession>(
        &mut self,
        registry: &mut SessionRegistry<S>,
        id: SessionId,
        stats: &mut Stats,
    ) -> Option<HandshakeOutcome> {
        let session = registry.get_mut(id)?;
        if session.state() != HandshakeState::Pending {
            return None;
        }

        match session.transport_mut().accept() {
            Ok(()) => {
                let moved = session.set_state(HandshakeState::Established);
                debug_assert!(moved.is_ok());
                session.touch();
                stats.handshakes += 1;
                info!(session = %id, peer = %session.peer(), "handshake complete");
                Some(HandshakeOutcome::Established)
            }
            Err(e) if e.is_would_block() => {
                trace!(session = %id, "handshake in progress");
                Some(HandshakeOutcome::Pending)
            }
            Err(e) => {
                warn!(session = %id, peer = %session.peer(), error = %e, "handshake failed");
                stats.handshake_failures += 1;
                stats.closes += 1;
                registry.retire(id);
                Some(HandshakeOutcome::Failed)
            }
        }
    }

    fn discard(&self, endpoint: &mut ListeningEndpoint) {
        if let Err(e) = endpoint.discard() {
            warn!(error = %e, "could not drop datagram");
        }
    }
}
