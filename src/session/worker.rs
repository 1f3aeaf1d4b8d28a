//! # Session Worker
//!
//! The single consumer of a running voice session. Transport events, playback
//! completions and the stop request are all handled here, one at a time, in
//! arrival order. Decoding and scheduling happen inline, so replies always
//! play in the order the server sent them.
//!
//! ## Event Handling:
//! - **opened**: state → Open, status → "Talking with ...!", capture starts
//! - **message**: audio is scheduled first, then the interrupted flag is
//!   applied, matching the order both can appear in one server message
//! - **closed**: status → "Chat ended."
//! - **error**: state → Error, status → "Connection error.", then Closed
//! - **undecodable frame**: skipped and counted, the session keeps going
//!
//! ## Teardown Order:
//! 1. lifecycle flag set (capture pump stops sending)
//! 2. pending playback abandoned, playback sink closed
//! 3. capture released (directly, or by the pump as it exits)
//! 4. connection closed (clean close, then abort after the close timeout)
//! 5. state → Closed

use crate::audio::capture::CaptureSource;
use crate::audio::playback::{CompletionReceiver, UnitId};
use crate::live::protocol::ServerMessage;
use crate::live::transport::{LiveChannel, TransportEvent};
use crate::session::inbound::InboundPipeline;
use crate::session::outbound::spawn_capture_pump;
use crate::session::state::{
    talking_status, SessionCounters, SessionState, StatusBoard, STATUS_CONNECTION_ERROR,
    STATUS_ENDED,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything a running session owns.
pub struct SessionParts {
    pub capture: Box<dyn CaptureSource>,
    pub pipeline: InboundPipeline,
    pub completions: CompletionReceiver,
    pub channel: LiveChannel,
}

/// Per-session settings that do not change while it runs.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub persona_name: String,
    pub input_sample_rate: u32,
    pub close_timeout: Duration,
}

enum Step {
    Stop,
    Completed(UnitId),
    Event(TransportEvent),
}

/// Why the session ended; decides the final status line.
#[derive(Debug, Clone, PartialEq)]
enum Ending {
    Stopped,
    RemoteClosed(Option<String>),
    Failed(String),
}

impl Ending {
    fn reason(&self) -> Option<&str> {
        match self {
            Ending::Stopped => None,
            Ending::RemoteClosed(reason) => reason.as_deref(),
            Ending::Failed(reason) => Some(reason),
        }
    }
}

pub struct SessionWorker {
    id: Uuid,
    settings: WorkerSettings,
    status: Arc<StatusBoard>,
    counters: Arc<SessionCounters>,
    pipeline: InboundPipeline,
    completions: CompletionReceiver,
    channel: LiveChannel,
    capture: Option<Box<dyn CaptureSource>>,
    pump: Option<JoinHandle<()>>,
    lifecycle: watch::Sender<bool>,
    stop_requests: watch::Receiver<bool>,
}

impl SessionWorker {
    pub fn new(
        id: Uuid,
        settings: WorkerSettings,
        parts: SessionParts,
        status: Arc<StatusBoard>,
        stop_requests: watch::Receiver<bool>,
    ) -> Self {
        let (lifecycle, _) = watch::channel(false);
        let counters = Arc::new(SessionCounters::default());
        status.attach_counters(counters.clone());
        Self {
            id,
            settings,
            status,
            counters,
            pipeline: parts.pipeline,
            completions: parts.completions,
            channel: parts.channel,
            capture: Some(parts.capture),
            pump: None,
            lifecycle,
            stop_requests,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!(session_id = %self.id, "Session worker started");

        let ending = loop {
            if *self.stop_requests.borrow_and_update() {
                break Ending::Stopped;
            }

            let step = tokio::select! {
                biased;
                // A dropped controller counts as a stop request
                _ = self.stop_requests.changed() => Step::Stop,
                Some(id) = self.completions.recv() => Step::Completed(id),
                event = self.channel.events.recv() => {
                    Step::Event(event.unwrap_or(TransportEvent::Closed(None)))
                }
            };

            let ending = match step {
                Step::Stop => Some(Ending::Stopped),
                Step::Completed(id) => {
                    if self.pipeline.unit_finished(id) {
                        SessionCounters::incr(&self.counters.units_completed);
                    }
                    None
                }
                Step::Event(event) => self.handle_event(event),
            };
            self.publish();

            if let Some(ending) = ending {
                break ending;
            }
        };

        self.teardown(ending).await;
    }

    fn handle_event(&mut self, event: TransportEvent) -> Option<Ending> {
        match event {
            TransportEvent::Opened => {
                self.on_opened();
                None
            }
            TransportEvent::Message(message) => {
                self.on_message(&message);
                None
            }
            TransportEvent::Undecodable(reason) => {
                SessionCounters::incr(&self.counters.frames_skipped);
                warn!(session_id = %self.id, "Skipping undecodable server frame: {}", reason);
                None
            }
            TransportEvent::Closed(reason) => {
                info!(session_id = %self.id, reason = ?reason, "Realtime channel closed by server");
                Some(Ending::RemoteClosed(reason))
            }
            TransportEvent::Error(reason) => {
                error!(session_id = %self.id, "Realtime channel error: {}", reason);
                self.status
                    .transition(SessionState::Error, Some(STATUS_CONNECTION_ERROR));
                Some(Ending::Failed(reason))
            }
        }
    }

    fn on_opened(&mut self) {
        let talking = talking_status(&self.settings.persona_name);
        if !self.status.transition(SessionState::Open, Some(&talking)) {
            debug!(session_id = %self.id, "Ignoring repeated opened signal");
            return;
        }
        info!(session_id = %self.id, "Session open, starting capture");

        if let Some(capture) = self.capture.take() {
            self.pump = Some(spawn_capture_pump(
                capture,
                self.channel.outbound.clone(),
                self.settings.input_sample_rate,
                self.lifecycle.subscribe(),
                self.counters.clone(),
            ));
        }
    }

    fn on_message(&mut self, message: &ServerMessage) {
        if let Some(blob) = message.audio_payload() {
            SessionCounters::incr(&self.counters.audio_frames_received);
            match self.pipeline.accept_audio(blob) {
                Ok(Some(_)) => {
                    SessionCounters::incr(&self.counters.units_scheduled);
                    self.status.set_interrupted(false);
                }
                Ok(None) => {}
                Err(e) => {
                    SessionCounters::incr(&self.counters.frames_skipped);
                    warn!(session_id = %self.id, "Skipping audio frame: {}", e);
                }
            }
        }

        if message.is_interrupted() {
            let stopped = self.pipeline.interrupt();
            SessionCounters::incr(&self.counters.interruptions);
            self.status.set_interrupted(true);
            info!(session_id = %self.id, stopped_units = stopped, "Reply interrupted by the user");
        }

        let text = message.text();
        if !text.is_empty() {
            debug!(session_id = %self.id, transcript = %text, "Model text");
        }

        if message.is_turn_complete() {
            SessionCounters::incr(&self.counters.turns_completed);
            debug!(session_id = %self.id, "Turn complete");
        }

        if let Some(go_away) = &message.go_away {
            warn!(
                session_id = %self.id,
                time_left = ?go_away.time_left,
                "Server is about to close the session"
            );
        }
    }

    fn publish(&self) {
        self.status
            .set_playback(self.pipeline.active_len(), self.pipeline.cursor());
    }

    async fn teardown(mut self, ending: Ending) {
        debug!(session_id = %self.id, ending = ?ending, "Tearing down session");

        // Receivers may already be gone
        let _ = self.lifecycle.send(true);

        self.pipeline.abandon();

        if let Some(mut capture) = self.capture.take() {
            capture.release();
        }
        if let Some(pump) = self.pump.take() {
            if let Err(e) = pump.await {
                warn!(session_id = %self.id, "Capture pump ended abnormally: {}", e);
            }
        }

        self.channel.guard.close(self.settings.close_timeout).await;

        self.publish();
        let final_status = match &ending {
            Ending::Stopped | Ending::RemoteClosed(_) => STATUS_ENDED,
            Ending::Failed(_) => STATUS_CONNECTION_ERROR,
        };
        self.status
            .transition(SessionState::Closed, Some(final_status));

        let metrics = self.counters.snapshot();
        info!(
            session_id = %self.id,
            frames_sent = metrics.frames_sent,
            units_scheduled = metrics.units_scheduled,
            interruptions = metrics.interruptions,
            reason = ending.reason().unwrap_or("none"),
            "Session closed"
        );
    }
}
