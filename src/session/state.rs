//! # Session State
//!
//! Lifecycle states, the user-facing status line and the observable snapshot
//! of the current voice session.
//!
//! ## Session Lifecycle:
//! 1. **Idle**: no chat has been started yet ("Ready to chat!")
//! 2. **Connecting**: capture acquired, realtime channel being opened
//! 3. **Open**: the server is ready; audio flows both ways
//! 4. **Error**: the channel failed; always followed by Closed
//! 5. **Closed**: the chat ended; a new one may be started
//!
//! `Open` carries an orthogonal *interrupted* flag that is set by a barge-in
//! and cleared when the next reply unit is scheduled.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

pub const STATUS_READY: &str = "Ready to chat!";
pub const STATUS_CONNECTING: &str = "Connecting...";
pub const STATUS_ENDED: &str = "Chat ended.";
pub const STATUS_CONNECTION_ERROR: &str = "Connection error.";
pub const STATUS_START_FAILED: &str = "Failed to start chat.";
pub const STATUS_PERMISSION_NEEDED: &str =
    "Professor Spark needs your microphone to chat. Please allow access and try again!";

/// "Talking with Professor Spark!"
pub fn talking_status(persona_name: &str) -> String {
    format!("Talking with {}!", persona_name)
}

/// Primary lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Error,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Error => "error",
            SessionState::Closed => "closed",
        }
    }

    /// Whether `start()` may be called from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Closed)
    }

    /// The transition table. Anything not listed is rejected.
    ///
    /// ```text
    /// Idle, Closed             → Connecting   start()
    /// Connecting               → Open         remote opened
    /// Connecting               → Closed       permission / connect failure
    /// Connecting, Open         → Error        remote error
    /// Connecting, Open, Error  → Closed       remote closed, stop(), teardown
    /// ```
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (*self, next),
            (Idle | Closed, Connecting)
                | (Connecting, Open)
                | (Connecting | Open, Error)
                | (Connecting | Open | Error, Closed)
        )
    }
}

/// Observational per-session counters. Updated from the worker and the
/// capture pump without locking.
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub frames_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub frames_discarded: AtomicU64,
    pub audio_frames_received: AtomicU64,
    pub frames_skipped: AtomicU64,
    pub units_scheduled: AtomicU64,
    pub units_completed: AtomicU64,
    pub interruptions: AtomicU64,
    pub turns_completed: AtomicU64,
}

impl SessionCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionMetrics {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        SessionMetrics {
            frames_sent: load(&self.frames_sent),
            bytes_sent: load(&self.bytes_sent),
            frames_discarded: load(&self.frames_discarded),
            audio_frames_received: load(&self.audio_frames_received),
            frames_skipped: load(&self.frames_skipped),
            units_scheduled: load(&self.units_scheduled),
            units_completed: load(&self.units_completed),
            interruptions: load(&self.interruptions),
            turns_completed: load(&self.turns_completed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionMetrics {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub frames_discarded: u64,
    pub audio_frames_received: u64,
    pub frames_skipped: u64,
    pub units_scheduled: u64,
    pub units_completed: u64,
    pub interruptions: u64,
    pub turns_completed: u64,
}

/// Everything an observer can see about the current (or last) session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Option<Uuid>,
    pub state: SessionState,
    pub status: String,
    pub interrupted: bool,
    pub active_units: usize,
    pub playback_cursor: f64,
    pub metrics: SessionMetrics,
    pub created_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            session_id: None,
            state: SessionState::Idle,
            status: STATUS_READY.to_string(),
            interrupted: false,
            active_units: 0,
            playback_cursor: 0.0,
            metrics: SessionMetrics::default(),
            created_at: None,
            opened_at: None,
            ended_at: None,
        }
    }
}

/// Shared, lock-protected session snapshot.
///
/// ## Thread Safety:
/// Written by the controller and the session worker, read by HTTP handlers.
/// Locks are held only for the duration of a field update, never across an
/// await point. Metrics are read from the attached counters when a snapshot
/// is taken, so frames sent by the capture pump show up immediately.
#[derive(Debug, Default)]
pub struct StatusBoard {
    inner: RwLock<SessionSnapshot>,
    counters: RwLock<Option<Arc<SessionCounters>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut snapshot = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(counters) = counters.as_ref() {
            snapshot.metrics = counters.snapshot();
        }
        snapshot
    }

    /// Report metrics from `counters` until the next `begin()`.
    pub fn attach_counters(&self, counters: Arc<SessionCounters>) {
        *self.counters.write().unwrap_or_else(PoisonError::into_inner) = Some(counters);
    }

    pub fn state(&self) -> SessionState {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    fn update<R>(&self, f: impl FnOnce(&mut SessionSnapshot) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Reset for a new session entering `Connecting`.
    pub fn begin(&self, session_id: Uuid) -> bool {
        let began = self.update(|snapshot| {
            if !snapshot.state.can_transition_to(SessionState::Connecting) {
                return false;
            }
            *snapshot = SessionSnapshot {
                session_id: Some(session_id),
                state: SessionState::Connecting,
                status: STATUS_CONNECTING.to_string(),
                created_at: Some(Utc::now()),
                ..SessionSnapshot::default()
            };
            true
        });
        if began {
            *self.counters.write().unwrap_or_else(PoisonError::into_inner) = None;
        }
        began
    }

    /// Apply a lifecycle transition if the table allows it. Returns whether the
    /// state changed.
    pub fn transition(&self, next: SessionState, status: Option<&str>) -> bool {
        self.update(|snapshot| {
            let current = snapshot.state;
            if current == next {
                if let Some(status) = status {
                    snapshot.status = status.to_string();
                }
                return false;
            }
            if !current.can_transition_to(next) {
                warn!(
                    from = current.as_str(),
                    to = next.as_str(),
                    "Rejected session state transition"
                );
                return false;
            }

            debug!(from = current.as_str(), to = next.as_str(), "Session state transition");
            snapshot.state = next;
            if let Some(status) = status {
                snapshot.status = status.to_string();
            }
            match next {
                SessionState::Open => snapshot.opened_at = Some(Utc::now()),
                SessionState::Closed => {
                    snapshot.ended_at = Some(Utc::now());
                    snapshot.interrupted = false;
                    snapshot.active_units = 0;
                }
                _ => {}
            }
            true
        })
    }

    pub fn set_interrupted(&self, interrupted: bool) {
        self.update(|snapshot| snapshot.interrupted = interrupted);
    }

    pub fn set_playback(&self, active_units: usize, cursor: f64) {
        self.update(|snapshot| {
            snapshot.active_units = active_units;
            snapshot.playback_cursor = cursor;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use SessionState::*;
        assert!(Idle.can_transition_to(Connecting));
        assert!(Closed.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Open));
        assert!(Connecting.can_transition_to(Closed));
        assert!(Open.can_transition_to(Error));
        assert!(Error.can_transition_to(Closed));

        assert!(!Idle.can_transition_to(Open));
        assert!(!Open.can_transition_to(Connecting));
        assert!(!Error.can_transition_to(Open));
        assert!(!Closed.can_transition_to(Open));
        assert!(!Idle.can_transition_to(Closed));
    }

    #[test]
    fn test_only_idle_and_closed_can_start() {
        assert!(SessionState::Idle.can_start());
        assert!(SessionState::Closed.can_start());
        assert!(!SessionState::Connecting.can_start());
        assert!(!SessionState::Open.can_start());
        assert!(!SessionState::Error.can_start());
    }

    #[test]
    fn test_board_lifecycle() {
        let board = StatusBoard::new();
        assert_eq!(board.snapshot().status, STATUS_READY);

        let id = Uuid::new_v4();
        assert!(board.begin(id));
        assert_eq!(board.state(), SessionState::Connecting);
        assert!(!board.begin(Uuid::new_v4()), "cannot begin twice");

        assert!(board.transition(SessionState::Open, Some("Talking with Professor Spark!")));
        board.set_interrupted(true);
        assert!(board.transition(SessionState::Closed, Some(STATUS_ENDED)));

        let snapshot = board.snapshot();
        assert_eq!(snapshot.session_id, Some(id));
        assert_eq!(snapshot.status, STATUS_ENDED);
        assert!(!snapshot.interrupted);
        assert!(snapshot.opened_at.is_some());
        assert!(snapshot.ended_at.is_some());
    }

    #[test]
    fn test_invalid_transition_keeps_state() {
        let board = StatusBoard::new();
        assert!(!board.transition(SessionState::Open, Some("nope")));
        assert_eq!(board.state(), SessionState::Idle);
        assert_eq!(board.snapshot().status, STATUS_READY);
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = SessionCounters::default();
        SessionCounters::incr(&counters.frames_sent);
        SessionCounters::add(&counters.bytes_sent, 128);
        let metrics = counters.snapshot();
        assert_eq!(metrics.frames_sent, 1);
        assert_eq!(metrics.bytes_sent, 128);
        assert_eq!(metrics.frames_skipped, 0);
    }

    #[test]
    fn test_snapshot_reads_attached_counters() {
        let board = StatusBoard::new();
        assert!(board.begin(Uuid::new_v4()));
        let counters = Arc::new(SessionCounters::default());
        board.attach_counters(counters.clone());

        SessionCounters::incr(&counters.frames_sent);
        assert_eq!(board.snapshot().metrics.frames_sent, 1);

        // A new session starts from zero
        board.transition(SessionState::Closed, Some(STATUS_ENDED));
        assert!(board.begin(Uuid::new_v4()));
        assert_eq!(board.snapshot().metrics.frames_sent, 0);
    }

    #[test]
    fn test_talking_status() {
        assert_eq!(talking_status("Professor Spark"), "Talking with Professor Spark!");
    }

    #[test]
    fn test_state_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&SessionState::Open).unwrap(), "\"open\"");
    }
}
