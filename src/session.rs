//! Session identifiers for discovery and wired-recovery attempts.
//!
//! Every externally triggered attempt gets a fresh [`SessionId`]. Completions
//! carry the id they were started with, and anything whose id is no longer
//! current is dropped without touching state.

use std::fmt;

use crate::types::ScanTarget;

// =============================================================================
// Session ids
// =============================================================================

/// Identifier of one logical discovery, cleanup or cooldown attempt.
///
/// Zero is reserved for "no session has been issued yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a session was opened for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPurpose {
    /// Scanning the given transports.
    Discovery(Vec<ScanTarget>),
    /// Waiting out the grace delay and forced cleanup after a wired detach.
    Cleanup,
    /// Cooldown after cleanup, before discovery is allowed again.
    Cooldown,
}

/// An issued session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub purpose: SessionPurpose,
}

// =============================================================================
// Tracker
// =============================================================================

/// Issues session ids and remembers which one is still live.
///
/// Owned by the orchestration worker, so it needs no locking.
#[derive(Debug, Default)]
pub struct SessionTracker {
    last_issued: u64,
    current: Option<Session>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new session and make it current, superseding any previous one.
    ///
    /// Ids increase strictly and wrap on overflow, skipping zero.
    pub fn next_session(&mut self, purpose: SessionPurpose) -> SessionId {
        self.last_issued = self.last_issued.wrapping_add(1);
        if self.last_issued == 0 {
            self.last_issued = 1;
        }
        let id = SessionId(self.last_issued);
        self.current = Some(Session { id, purpose });
        id
    }

    /// Returns true if `id` is the session still associated with an active state.
    pub fn is_current(&self, id: SessionId) -> bool {
        self.current.as_ref().is_some_and(|s| s.id == id)
    }

    /// The live session, if any.
    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// End the live session. Later completions for it become stale.
    pub fn retire(&mut self) -> Option<Session> {
        self.current.take()
    }

    /// The most recently issued id, whether or not it is still live.
    pub fn last_issued(&self) -> SessionId {
        SessionId(self.last_issued)
    }

    #[cfg(test)]
    fn with_last_issued(last_issued: u64) -> Self {
        Self {
            last_issued,
            current: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_strictly_increase() {
        let mut tracker = SessionTracker::new();
        let a = tracker.next_session(SessionPurpose::Cleanup);
        let b = tracker.next_session(SessionPurpose::Cooldown);
        assert!(b > a);
        assert_eq!(tracker.last_issued(), b);
    }

    #[test]
    fn test_newer_session_supersedes_older() {
        let mut tracker = SessionTracker::new();
        let a = tracker.next_session(SessionPurpose::Discovery(vec![ScanTarget::Lan]));
        assert!(tracker.is_current(a));

        let b = tracker.next_session(SessionPurpose::Discovery(vec![ScanTarget::Usb]));
        assert!(!tracker.is_current(a));
        assert!(tracker.is_current(b));
    }

    #[test]
    fn test_retired_session_is_not_current() {
        let mut tracker = SessionTracker::new();
        let a = tracker.next_session(SessionPurpose::Cleanup);
        let retired = tracker.retire().unwrap();
        assert_eq!(retired.id, a);
        assert_eq!(retired.purpose, SessionPurpose::Cleanup);
        assert!(!tracker.is_current(a));
        assert!(tracker.current().is_none());
        // last_issued survives retirement for introspection
        assert_eq!(tracker.last_issued(), a);
    }

    #[test]
    fn test_wraps_past_zero() {
        let mut tracker = SessionTracker::with_last_issued(u64::MAX);
        let id = tracker.next_session(SessionPurpose::Cooldown);
        assert_eq!(id, SessionId(1));
        assert!(tracker.is_current(id));
    }

    #[test]
    fn test_nothing_current_initially() {
        let tracker = SessionTracker::new();
        assert!(!tracker.is_current(SessionId(0)));
        assert_eq!(tracker.last_issued().get(), 0);
    }
}
