//! Session registry: arena owning every tracked session.
//!
//! Slots are reused LIFO through a free stack. Each slot carries a
//! generation bumped on removal, so a stale `SessionId` never resolves to
//! the slot's next occupant.
//!
//! The registry is the single owner of each `Session`. Removing a session
//! from the registry drops it, which closes its descriptor; nothing else in
//! the server keeps a handle past that point.

use std::net::SocketAddr;
use std::os::fd::{AsFd, BorrowedFd};
use std::time::Instant;

use dtls_core::session::{HandshakeState, InvalidTransition, SessionId};
use dtls_core::transport::SecureSession;

/// One accepted peer.
pub struct Session<S> {
    id: SessionId,
    transport: S,
    peer: SocketAddr,
    state: HandshakeState,
    created_at: Instant,
    last_activity: Instant,
}

impl<S: SecureSession> Session<S> {
    #[inline]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[inline]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    #[inline]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    #[inline]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    #[inline]
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Record traffic from the peer.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn transport(&self) -> &S {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut S {
        &mut self.transport
    }

    pub fn set_state(&mut self, next: HandshakeState) -> Result<(), InvalidTransition> {
        self.state = self.state.transition(next)?;
        Ok(())
    }
}

struct Slot<S> {
    generation: u32,
    entry: Option<Session<S>>,
}

pub struct SessionRegistry<S> {
    slots: Vec<Slot<S>>,
    free: Vec<u32>,
    len: usize,
    capacity: usize,
}

impl<S: SecureSession> SessionRegistry<S> {
    /// Create a registry holding at most `capacity` sessions.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            capacity,
        }
    }

    /// Track a new PENDING session.
    ///
    /// Hands the transport back when the registry is full.
    pub fn insert(&mut self, transport: S, peer: SocketAddr) -> Result<SessionId, S> {
        if self.is_full() {
            return Err(transport);
        }

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        let id = SessionId::new(index, slot.generation);
        let now = Instant::now();
        slot.entry = Some(Session {
            id,
            transport,
            peer,
            state: HandshakeState::Pending,
            created_at: now,
            last_activity: now,
        });
        self.len += 1;
        Ok(id)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session<S>> {
        let slot = self.slots.get(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.entry.as_ref()
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session<S>> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.entry.as_mut()
    }

    #[inline]
    pub fn contains(&self, id: SessionId) -> bool {
        self.get(id).is_some()
    }

    pub fn state(&self, id: SessionId) -> Option<HandshakeState> {
        self.get(id).map(Session::state)
    }

    /// Stop tracking a session and hand it back to the caller.
    ///
    /// The slot's generation is bumped, invalidating `id`.
    pub fn remove(&mut self, id: SessionId) -> Option<Session<S>> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        let session = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index() as u32);
        self.len -= 1;
        Some(session)
    }

    /// Tear a session down.
    ///
    /// Marks it CLOSING, sends a best-effort close notification, then drops
    /// it, which closes the descriptor. Returns the peer it was bound to.
    pub fn retire(&mut self, id: SessionId) -> Option<SocketAddr> {
        let session = self.get_mut(id)?;
        // Already CLOSING is fine; anything else moves there.
        let _ = session.set_state(HandshakeState::Closing);
        session.transport.shutdown();
        self.remove(id).map(|session| session.peer)
    }

    /// Find the session bound to `peer`, if any.
    pub fn find_peer(&self, peer: SocketAddr) -> Option<SessionId> {
        self.iter().find(|s| s.peer == peer).map(|s| s.id)
    }

    /// Descriptors of every PENDING or ESTABLISHED session.
    pub fn watched(&self) -> impl Iterator<Item = (SessionId, BorrowedFd<'_>)> + '_ {
        self.iter()
            .filter(|s| s.state.is_watched())
            .map(|s| (s.id, s.transport.channel().as_fd()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session<S>> + '_ {
        self.slots.iter().filter_map(|slot| slot.entry.as_ref())
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.iter().map(|s| s.id).collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
