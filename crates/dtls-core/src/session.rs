//! Session identifier and handshake state types

use core::fmt;

/// Stable identifier for a tracked session
///
/// Indexes a slot in the session registry. The generation distinguishes
/// successive occupants of the same slot, so an id held across a teardown
/// never resolves to the session that replaced it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId {
    index: u32,
    generation: u32,
}

impl SessionId {
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        SessionId { index, generation }
    }

    /// Slot index, for registry lookups
    #[inline]
    pub const fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({}.{})", self.index, self.generation)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Handshake state of a session
///
/// `Pending -> Established -> Closing`, with `Pending -> Closing` on a failed
/// handshake. There is no way back out of `Closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeState {
    /// Handshake started, not yet complete
    Pending = 0,

    /// Handshake complete, application data may flow
    Established = 1,

    /// Fatal error seen, descriptor about to be closed
    Closing = 2,
}

impl HandshakeState {
    /// Check if sessions in this state belong in the watched set
    #[inline]
    pub const fn is_watched(&self) -> bool {
        matches!(self, HandshakeState::Pending | HandshakeState::Established)
    }

    #[inline]
    pub const fn can_transition_to(&self, next: HandshakeState) -> bool {
        matches!(
            (self, next),
            (HandshakeState::Pending, HandshakeState::Established)
                | (HandshakeState::Pending, HandshakeState::Closing)
                | (HandshakeState::Established, HandshakeState::Closing)
        )
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow
    pub fn transition(self, next: HandshakeState) -> Result<HandshakeState, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeState::Pending => write!(f, "PENDING"),
            HandshakeState::Established => write!(f, "ESTABLISHED"),
            HandshakeState::Closing => write!(f, "CLOSING"),
        }
    }
}

/// Rejected lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid session transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: HandshakeState,
    pub to: HandshakeState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let s = HandshakeState::Pending;
        let s = s.transition(HandshakeState::Established).unwrap();
        let s = s.transition(HandshakeState::Closing).unwrap();
        assert_eq!(s, HandshakeState::Closing);

        assert_eq!(
            HandshakeState::Pending.transition(HandshakeState::Closing),
            Ok(HandshakeState::Closing)
        );
    }

    #[test]
    fn test_no_way_back_from_closing() {
        let err = HandshakeState::Closing
            .transition(HandshakeState::Established)
            .unwrap_err();
        assert_eq!(err.from, HandshakeState::Closing);
        assert_eq!(err.to, HandshakeState::Established);
        assert_eq!(err.to_string(), "invalid session transition CLOSING -> ESTABLISHED");

        assert!(HandshakeState::Established
            .transition(HandshakeState::Pending)
            .is_err());
    }

    #[test]
    fn test_watched_states() {
        assert!(HandshakeState::Pending.is_watched());
        assert!(HandshakeState::Established.is_watched());
        assert!(!HandshakeState::Closing.is_watched());
    }

    #[test]
    fn test_id_display() {
        let id = SessionId::new(3, 7);
        assert_eq!(id.to_string(), "#3.7");
        assert_eq!(id.index(), 3);
        assert_eq!(id.generation(), 7);
    }
}
