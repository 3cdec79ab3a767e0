//! Runtime state shared by the console loop and the transport's event handler.
//!
//! The two sides run in different tasks, so every field here is behind a
//! synchronization primitive: the continuation flag is atomic, the display
//! name sits behind a lock, and the connection phase is published through a
//! `watch` channel so the runner can wait for the connect outcome.

use std::sync::{
    PoisonError, RwLock,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::watch;
use tracing::debug;

/// Where the session is in its connect-to-disconnect lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing requested yet.
    Idle,
    Connecting,
    Connected,
    /// Terminal. Reached by connect failure, peer disconnect or local quit.
    Disconnected,
}

#[derive(Debug)]
pub struct Session {
    continue_running: AtomicBool,
    connected_once: AtomicBool,
    display_name: RwLock<String>,
    phase: watch::Sender<Phase>,
}

impl Session {
    pub fn new(display_name: impl Into<String>) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            continue_running: AtomicBool::new(true),
            connected_once: AtomicBool::new(false),
            display_name: RwLock::new(display_name.into()),
            phase,
        }
    }

    pub fn is_running(&self) -> bool {
        self.continue_running.load(Ordering::Acquire)
    }

    /// Clears the continuation flag. Returns `true` only for the call that
    /// actually cleared it.
    pub fn stop(&self) -> bool {
        self.continue_running.swap(false, Ordering::AcqRel)
    }

    pub fn display_name(&self) -> String {
        self.display_name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn rename(&self, name: &str) {
        let mut current = self
            .display_name
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        debug!(from = %current, to = %name, "display name changed");
        *current = name.to_string();
    }

    pub fn prompt(&self) -> String {
        format!("{} : ", self.display_name())
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn was_connected(&self) -> bool {
        self.connected_once.load(Ordering::Acquire)
    }

    /// `Idle -> Connecting`. Any other starting phase is left alone.
    pub fn begin_connect(&self) -> bool {
        self.transition(|phase| *phase == Phase::Idle, Phase::Connecting)
    }

    /// `Connecting -> Connected`. Any other starting phase is left alone.
    pub fn mark_connected(&self) -> bool {
        let moved = self.transition(|phase| *phase == Phase::Connecting, Phase::Connected);
        if moved {
            self.connected_once.store(true, Ordering::Release);
        }
        moved
    }

    /// Moves to the terminal phase and clears the continuation flag.
    /// Returns `true` the first time.
    pub fn close(&self) -> bool {
        let moved = self.transition(|phase| *phase != Phase::Disconnected, Phase::Disconnected);
        self.stop();
        moved
    }

    /// Waits until the connect attempt has an outcome: either `Connected`, or
    /// `Disconnected` when it failed or the session ended first.
    pub async fn settled(&self) -> Phase {
        let mut rx = self.phase.subscribe();
        match rx
            .wait_for(|phase| matches!(phase, Phase::Connected | Phase::Disconnected))
            .await
        {
            Ok(phase) => *phase,
            // The sender lives in `self`, so this only happens during teardown.
            Err(_) => Phase::Disconnected,
        }
    }

    fn transition(&self, allowed: impl FnOnce(&Phase) -> bool, next: Phase) -> bool {
        self.phase.send_if_modified(|phase| {
            if allowed(phase) {
                debug!(from = ?*phase, to = ?next, "session phase changed");
                *phase = next;
                true
            } else {
                false
            }
        })
    }
}
