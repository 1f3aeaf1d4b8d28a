//! # Live Session Controller
//!
//! Owns at most one voice session at a time and exposes the two user actions,
//! `start()` and `stop()`, plus a status snapshot for observers.
//!
//! ## Start Sequence:
//! 1. state → Connecting ("Connecting...")
//! 2. acquire the capture source (denied → permission status, Closed)
//! 3. open the playback sink owned by the session
//! 4. connect to the realtime endpoint within the connect timeout
//!    (failure → "Failed to start chat.", Closed)
//! 5. hand everything to a [`SessionWorker`]; capture starts once the server
//!    reports the session as opened
//!
//! Every resource acquired before a failing step is released before `start()`
//! returns. A `stop()` issued during steps 2–4 cancels the attempt.
//!
//! ## Concurrency:
//! `start()` and `stop()` are serialized by an async lock, so a stop never
//! observes a half-built session. The stop signal itself is sent before that
//! lock is taken, which is what lets it cancel a pending connect.

use crate::audio::capture::{CaptureProvider, CaptureRequest, CaptureSource};
use crate::audio::playback::{PlaybackProvider, PlaybackRequest};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::live::protocol::LiveConnectConfig;
use crate::live::transport::LiveConnector;
use crate::session::inbound::InboundPipeline;
use crate::session::state::{
    SessionSnapshot, SessionState, StatusBoard, STATUS_ENDED, STATUS_PERMISSION_NEEDED,
    STATUS_START_FAILED,
};
use crate::session::worker::{SessionParts, SessionWorker, WorkerSettings};
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct ActiveSession {
    id: Uuid,
    stop_tx: watch::Sender<bool>,
    worker: Option<JoinHandle<()>>,
}

/// Why a start attempt did not produce a running session.
enum StartFailure {
    Failed { error: AppError, status: &'static str },
    Cancelled,
}

pub struct LiveController {
    connector: Arc<dyn LiveConnector>,
    capture: Arc<dyn CaptureProvider>,
    playback: Arc<dyn PlaybackProvider>,
    status: Arc<StatusBoard>,
    active: Mutex<Option<ActiveSession>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl LiveController {
    pub fn new(
        connector: Arc<dyn LiveConnector>,
        capture: Arc<dyn CaptureProvider>,
        playback: Arc<dyn PlaybackProvider>,
    ) -> Self {
        Self {
            connector,
            capture,
            playback,
            status: Arc::new(StatusBoard::new()),
            active: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn status(&self) -> SessionSnapshot {
        self.status.snapshot()
    }

    pub fn state(&self) -> SessionState {
        self.status.state()
    }

    fn active(&self) -> std::sync::MutexGuard<'_, Option<ActiveSession>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a new chat with `config`.
    ///
    /// ## Errors:
    /// - `InvalidState` unless the controller is Idle or Closed
    /// - `Permission` when the capture source cannot be acquired
    /// - `Connection` when the channel cannot be opened in time
    pub async fn start(&self, config: &AppConfig) -> AppResult<Uuid> {
        let _lifecycle = self.lifecycle.lock().await;

        let state = self.status.state();
        if !state.can_start() {
            return Err(AppError::InvalidState(format!(
                "cannot start a chat while the session is {}",
                state.as_str()
            )));
        }

        // Reap a session that already ended on its own
        let finished = self.active().take();
        if let Some(previous) = finished {
            if let Some(worker) = previous.worker {
                let _ = worker.await;
            }
        }

        let id = Uuid::new_v4();
        let (stop_tx, stop_rx) = watch::channel(false);
        if !self.status.begin(id) {
            return Err(AppError::InvalidState("a chat is already starting".to_string()));
        }
        *self.active() = Some(ActiveSession {
            id,
            stop_tx,
            worker: None,
        });
        info!(session_id = %id, "Starting chat");

        match self.open_session(config, stop_rx.clone()).await {
            Ok(parts) => {
                let settings = WorkerSettings {
                    persona_name: config.live.persona_name.clone(),
                    input_sample_rate: config.audio.input_sample_rate,
                    close_timeout: config.live.close_timeout(),
                };
                let worker =
                    SessionWorker::new(id, settings, parts, self.status.clone(), stop_rx).spawn();
                if let Some(active) = self.active().as_mut() {
                    active.worker = Some(worker);
                }
                Ok(id)
            }
            Err(StartFailure::Failed { error, status }) => {
                warn!(session_id = %id, "Failed to start chat: {}", error);
                self.active().take();
                self.status.transition(SessionState::Closed, Some(status));
                Err(error)
            }
            Err(StartFailure::Cancelled) => {
                info!(session_id = %id, "Chat stopped before it opened");
                self.active().take();
                self.status.transition(SessionState::Closed, Some(STATUS_ENDED));
                Err(AppError::InvalidState(
                    "the chat was stopped before it opened".to_string(),
                ))
            }
        }
    }

    /// Acquire capture, open playback, connect. Releases whatever it already
    /// holds when a later step fails or a stop arrives.
    async fn open_session(
        &self,
        config: &AppConfig,
        mut stop_rx: watch::Receiver<bool>,
    ) -> Result<SessionParts, StartFailure> {
        let request = CaptureRequest {
            sample_rate: config.audio.input_sample_rate,
            chunk_size: config.audio.chunk_size,
            device: config.capture.clone(),
        };
        let mut capture = match until_stopped(&mut stop_rx, self.capture.acquire(request)).await {
            None => return Err(StartFailure::Cancelled),
            Some(Err(error)) => {
                return Err(StartFailure::Failed {
                    error: as_permission_error(error),
                    status: STATUS_PERMISSION_NEEDED,
                })
            }
            Some(Ok(capture)) => capture,
        };

        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let playback_request = PlaybackRequest {
            sample_rate: config.audio.output_sample_rate,
            record_path: Some(config.playback.record_path.trim())
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
        };
        let sink = match self.playback.open(&playback_request, completion_tx) {
            Ok(sink) => sink,
            Err(error) => {
                capture.release();
                return Err(StartFailure::Failed {
                    error,
                    status: STATUS_START_FAILED,
                });
            }
        };
        let mut pipeline = InboundPipeline::new(sink, config.audio.output_sample_rate);

        let live = LiveConnectConfig::from_app_config(config);
        let timeout = config.live.connect_timeout();
        let connect = tokio::time::timeout(timeout, self.connector.connect(&live));
        let failure = match until_stopped(&mut stop_rx, connect).await {
            Some(Ok(Ok(channel))) => {
                debug!("Realtime channel established");
                return Ok(SessionParts {
                    capture,
                    pipeline,
                    completions: completion_rx,
                    channel,
                });
            }
            Some(Ok(Err(error))) => StartFailure::Failed {
                error,
                status: STATUS_START_FAILED,
            },
            Some(Err(_elapsed)) => StartFailure::Failed {
                error: AppError::Connection(format!(
                    "no connection within {}ms",
                    timeout.as_millis()
                )),
                status: STATUS_START_FAILED,
            },
            None => StartFailure::Cancelled,
        };

        release_partial(capture.as_mut(), &mut pipeline);
        Err(failure)
    }

    /// Stop the current chat, if any. Safe to call in every state and more
    /// than once; returns the final snapshot.
    pub async fn stop(&self) -> SessionSnapshot {
        // Signal first so a pending start() can observe it
        if let Some(active) = self.active().as_ref() {
            let _ = active.stop_tx.send(true);
        }

        let _lifecycle = self.lifecycle.lock().await;
        let active = self.active().take();
        match active {
            Some(active) => {
                info!(session_id = %active.id, "Stopping chat");
                let _ = active.stop_tx.send(true);
                if let Some(worker) = active.worker {
                    if let Err(e) = worker.await {
                        warn!(session_id = %active.id, "Session worker ended abnormally: {}", e);
                        self.status
                            .transition(SessionState::Closed, Some(STATUS_ENDED));
                    }
                }
            }
            None => debug!("Stop requested with no active chat"),
        }

        self.status.snapshot()
    }

    /// Stop whatever is running; used on service shutdown.
    pub async fn shutdown(&self) {
        let snapshot = self.stop().await;
        info!(state = snapshot.state.as_str(), "Live controller shut down");
    }
}

async fn until_stopped<F: Future>(stop_rx: &mut watch::Receiver<bool>, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = stop_rx.wait_for(|stopped| *stopped) => None,
        output = future => Some(output),
    }
}

fn as_permission_error(error: AppError) -> AppError {
    match error {
        AppError::Permission(_) => error,
        other => AppError::Permission(other.message().to_string()),
    }
}

fn release_partial(capture: &mut dyn CaptureSource, pipeline: &mut InboundPipeline) {
    capture.release();
    pipeline.abandon();
}
