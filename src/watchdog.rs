//! One-shot deadline timers and the per-session watchdog registry.
//!
//! A [`Deadline`] runs a callback on its own timer thread once its duration
//! elapses, unless it is cancelled first. Dropping the handle cancels it.
//! Callbacks never mutate orchestration state themselves; they post a message
//! back to the orchestration worker, which checks the session before acting.

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::session::SessionId;

// =============================================================================
// Deadline
// =============================================================================

/// A cancellable one-shot timer.
#[derive(Debug)]
pub struct Deadline {
    cancel_tx: Sender<()>,
}

impl Deadline {
    /// Start a timer that calls `on_fire` after `duration`.
    pub fn start<F>(duration: Duration, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();

        thread::spawn(move || match cancel_rx.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => on_fire(),
            // Explicit cancel, or the handle was dropped
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
        });

        Self { cancel_tx }
    }

    /// Cancel the timer. A no-op if it already fired.
    pub fn cancel(self) {
        let _ = self.cancel_tx.send(());
    }
}

// =============================================================================
// Watchdog Registry
// =============================================================================

type FireCallback = dyn Fn(SessionId) + Send + Sync + 'static;

/// Per-session backstop timers.
///
/// `arm` replaces any watchdog already armed for the same session, and
/// `disarm` is idempotent: disarming a fired, disarmed or unknown session
/// does nothing.
pub struct WatchdogRegistry {
    armed: HashMap<SessionId, Deadline>,
    on_fire: Arc<FireCallback>,
}

impl WatchdogRegistry {
    /// Create a registry whose watchdogs report expiry through `on_fire`.
    pub fn new<F>(on_fire: F) -> Self
    where
        F: Fn(SessionId) + Send + Sync + 'static,
    {
        Self {
            armed: HashMap::new(),
            on_fire: Arc::new(on_fire),
        }
    }

    /// Arm a watchdog for `session` that fires after `timeout`.
    pub fn arm(&mut self, session: SessionId, timeout: Duration) {
        let on_fire = Arc::clone(&self.on_fire);
        let deadline = Deadline::start(timeout, move || on_fire(session));
        log::debug!("watchdog: armed for session {} ({:?})", session, timeout);
        if let Some(previous) = self.armed.insert(session, deadline) {
            previous.cancel();
        }
    }

    /// Cancel the watchdog for `session`, if one is armed.
    pub fn disarm(&mut self, session: SessionId) {
        if let Some(deadline) = self.armed.remove(&session) {
            deadline.cancel();
            log::debug!("watchdog: disarmed for session {}", session);
        }
    }

    /// Forget a watchdog that has fired, without cancelling anything.
    pub fn fired(&mut self, session: SessionId) {
        self.armed.remove(&session);
    }

    pub fn is_armed(&self, session: SessionId) -> bool {
        self.armed.contains_key(&session)
    }

    /// Number of watchdogs currently armed.
    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    /// Cancel every armed watchdog.
    pub fn clear(&mut self) {
        for (_, deadline) in self.armed.drain() {
            deadline.cancel();
        }
    }
}

impl Drop for WatchdogRegistry {
    fn drop(&mut self) {
        self.clear();
    }
}
