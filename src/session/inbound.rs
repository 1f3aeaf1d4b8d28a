//! # Inbound Audio Pipeline
//!
//! Decodes audio payloads from the server and places them on the playback
//! sink through the [`PlaybackScheduler`]. Owned by the session worker, so
//! every call happens in message arrival order.

use crate::audio::pcm::{decode_pcm16_base64, sample_rate_from_mime};
use crate::audio::playback::{PlaybackScheduler, PlaybackSink, PlaybackUnit, ScheduledSlot, UnitId};
use crate::error::AppResult;
use crate::live::protocol::Blob;
use tracing::{debug, warn};

pub struct InboundPipeline {
    scheduler: PlaybackScheduler,
    sink: Box<dyn PlaybackSink>,
    default_rate: u32,
    interrupted: bool,
}

impl InboundPipeline {
    pub fn new(sink: Box<dyn PlaybackSink>, default_rate: u32) -> Self {
        Self {
            scheduler: PlaybackScheduler::new(),
            sink,
            default_rate,
            interrupted: false,
        }
    }

    /// Decode one payload and schedule it.
    ///
    /// ## Errors:
    /// `AppError::Decode` for invalid base64 or an odd byte count. Nothing is
    /// scheduled in that case and the cursor does not move.
    pub fn accept_audio(&mut self, blob: &Blob) -> AppResult<Option<ScheduledSlot>> {
        let samples = decode_pcm16_base64(&blob.data)?;
        if samples.is_empty() {
            debug!("Empty audio payload, nothing to schedule");
            return Ok(None);
        }

        let rate = sample_rate_from_mime(&blob.mime_type).unwrap_or(self.default_rate);
        let unit = PlaybackUnit::new(samples, rate);

        let now = self.sink.current_time();
        let slot = self.scheduler.schedule(now, unit.duration());
        self.sink.start(slot.id, unit, slot.start);
        self.interrupted = false;

        debug!(
            unit = %slot.id,
            start = slot.start,
            duration = slot.duration,
            active = self.scheduler.active_len(),
            "Scheduled playback unit"
        );
        Ok(Some(slot))
    }

    /// Barge-in: stop everything that is queued or playing.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.scheduler.interrupt();
        for id in &stopped {
            self.sink.stop(*id);
        }
        self.interrupted = true;
        stopped.len()
    }

    /// A unit ended naturally. Returns false for stale completions.
    pub fn unit_finished(&mut self, id: UnitId) -> bool {
        self.scheduler.complete(id)
    }

    /// Drop all pending audio and release the sink. Used on teardown.
    pub fn abandon(&mut self) {
        let pending = self.scheduler.interrupt();
        for id in &pending {
            self.sink.stop(*id);
        }
        if let Err(e) = self.sink.close() {
            warn!("Failed to close playback sink: {}", e);
        }
        if !pending.is_empty() {
            debug!(abandoned = pending.len(), "Abandoned pending playback");
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn active_len(&self) -> usize {
        self.scheduler.active_len()
    }

    pub fn cursor(&self) -> f64 {
        self.scheduler.cursor()
    }
}
