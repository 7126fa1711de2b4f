//! Shared session state.
//!
//! The phase of a session is the only mutable value both loops share. It is
//! published through a `watch` channel so that every reader sees the latest
//! value and can await a change instead of polling. Transitions only ever move
//! forward:
//!
//! ```text
//!  Idle ──▶ Establishing ──▶ Connected ──▶ Closing ──▶ Closed
//!                  │                                     ▲
//!                  └────────── establish failed ─────────┘
//! ```

use std::fmt;
use tokio::sync::watch;

/// Lifecycle phase of the (single) session in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SessionPhase {
    /// Nothing attempted yet
    #[default]
    Idle,
    /// Bind/accept or dial in progress
    Establishing,
    /// Stream is open; both loops may perform I/O
    Connected,
    /// A shutdown trigger fired; the stream is being released
    Closing,
    /// Terminal
    Closed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The connected flag, shared between the outbound and inbound loops.
#[derive(Debug)]
pub struct SessionState {
    phase: watch::Sender<SessionPhase>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// Create state in [`SessionPhase::Idle`]
    pub fn new() -> Self {
        let (phase, _) = watch::channel(SessionPhase::Idle);
        Self { phase }
    }

    /// Current phase
    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// True while the stream may be used
    pub fn is_connected(&self) -> bool {
        self.phase() == SessionPhase::Connected
    }

    /// Move forward to `next`. Returns false (and changes nothing) if the
    /// session is already at or past `next`.
    pub fn advance(&self, next: SessionPhase) -> bool {
        self.phase.send_if_modified(|phase| {
            if next > *phase {
                *phase = next;
                true
            } else {
                false
            }
        })
    }

    /// Claim the `Connected → Closing` transition. Exactly one caller wins.
    pub fn begin_closing(&self) -> bool {
        self.phase.send_if_modified(|phase| {
            if *phase == SessionPhase::Connected {
                *phase = SessionPhase::Closing;
                true
            } else {
                false
            }
        })
    }

    /// A receiver that can await phase changes
    pub fn watch(&self) -> PhaseWatch {
        PhaseWatch {
            rx: self.phase.subscribe(),
        }
    }
}

/// Per-loop view of the session phase.
#[derive(Debug, Clone)]
pub struct PhaseWatch {
    rx: watch::Receiver<SessionPhase>,
}

impl PhaseWatch {
    /// Latest published phase
    pub fn current(&self) -> SessionPhase {
        *self.rx.borrow()
    }

    /// Resolves once the session has left `Connected` (or the state is gone).
    pub async fn left_connected(&mut self) {
        let _ = self.rx.wait_for(|phase| *phase >= SessionPhase::Closing).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_phase_is_monotonic() {
        let state = SessionState::new();
        assert_eq!(state.phase(), SessionPhase::Idle);

        assert!(state.advance(SessionPhase::Establishing));
        assert!(state.advance(SessionPhase::Connected));
        assert!(state.is_connected());

        assert!(state.begin_closing());
        assert!(!state.is_connected());

        // Going back is refused, whatever the caller asks for
        assert!(!state.advance(SessionPhase::Connected));
        assert!(!state.advance(SessionPhase::Idle));
        assert_eq!(state.phase(), SessionPhase::Closing);

        assert!(state.advance(SessionPhase::Closed));
        assert!(!state.advance(SessionPhase::Closed));
        assert!(!state.is_connected());
    }

    #[test]
    fn test_begin_closing_requires_connected() {
        let state = SessionState::new();
        assert!(!state.begin_closing());

        state.advance(SessionPhase::Establishing);
        assert!(!state.begin_closing());

        // Failed establishment skips straight to Closed
        assert!(state.advance(SessionPhase::Closed));
        assert!(!state.begin_closing());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_close_has_one_winner() {
        let state = Arc::new(SessionState::new());
        state.advance(SessionPhase::Connected);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let state = state.clone();
            handles.push(tokio::spawn(async move { state.begin_closing() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(state.phase(), SessionPhase::Closing);
    }

    #[tokio::test]
    async fn test_watch_wakes_on_closing() {
        let state = Arc::new(SessionState::new());
        state.advance(SessionPhase::Connected);
        let mut watch = state.watch();
        assert_eq!(watch.current(), SessionPhase::Connected);

        let closer = state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.begin_closing();
        });

        timeout(Duration::from_secs(2), watch.left_connected())
            .await
            .expect("watch should observe Closing");
        assert_eq!(watch.current(), SessionPhase::Closing);
    }

    #[tokio::test]
    async fn test_watch_returns_when_state_dropped() {
        let state = SessionState::new();
        state.advance(SessionPhase::Connected);
        let mut watch = state.watch();
        drop(state);

        timeout(Duration::from_secs(1), watch.left_connected())
            .await
            .expect("dropped state must not leave waiters hanging");
    }
}
