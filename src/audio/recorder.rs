//! # Recording Playback Sink
//!
//! A playback device without speakers, driven by the wall clock. When a
//! `record_path` is configured, scheduled units are mixed onto a timeline that
//! is written out as a 16-bit mono WAV file when the session closes. Without
//! one, only the timers and end times of pending units are kept.
//!
//! ## Clock:
//! `current_time()` is seconds since the sink was opened. Each started unit
//! gets a timer that fires at its scheduled end and reports the completion,
//! exactly like the "ended" callback of a real output device.
//!
//! ## Stopping:
//! Stopping a unit cancels its timer and removes the part of its audio that
//! had not been "played" yet, so a recording of an interrupted turn ends
//! where the interruption happened.

use crate::audio::pcm::float_to_pcm16;
use crate::audio::playback::{
    CompletionSender, PlaybackProvider, PlaybackRequest, PlaybackSink, PlaybackUnit, UnitId,
};
use crate::error::{AppError, AppResult};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Integer PCM format tag in the WAV header.
const WAV_FORMAT_PCM: u16 = 1;

/// Opens [`WavRecorderSink`]s. Must be used from within a Tokio runtime.
#[derive(Debug, Default, Clone)]
pub struct WavRecorderProvider;

impl PlaybackProvider for WavRecorderProvider {
    fn open(
        &self,
        request: &PlaybackRequest,
        completions: CompletionSender,
    ) -> AppResult<Box<dyn PlaybackSink>> {
        if request.sample_rate == 0 {
            return Err(AppError::Internal(
                "playback sample rate must be greater than 0".to_string(),
            ));
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(AppError::Internal(
                "playback sink needs a running async runtime".to_string(),
            ));
        }

        debug!(
            sample_rate = request.sample_rate,
            record_path = ?request.record_path,
            "Playback sink opened"
        );
        Ok(Box::new(WavRecorderSink::new(
            request.sample_rate,
            request.record_path.clone(),
            completions,
        )))
    }
}

struct ScheduledUnit {
    start_sample: usize,
    /// Mixed samples; empty when nothing is recorded
    samples: Vec<f32>,
    end: f64,
    timer: JoinHandle<()>,
}

pub struct WavRecorderSink {
    origin: Instant,
    sample_rate: u32,
    timeline: Vec<f32>,
    units: HashMap<UnitId, ScheduledUnit>,
    completions: CompletionSender,
    record_path: Option<PathBuf>,
    closed: bool,
}

impl WavRecorderSink {
    pub fn new(sample_rate: u32, record_path: Option<PathBuf>, completions: CompletionSender) -> Self {
        Self {
            origin: Instant::now(),
            sample_rate,
            timeline: Vec::new(),
            units: HashMap::new(),
            completions,
            record_path,
            closed: false,
        }
    }

    /// Mixed output so far, in seconds.
    pub fn recorded_seconds(&self) -> f64 {
        self.timeline.len() as f64 / self.sample_rate as f64
    }

    pub fn scheduled_len(&self) -> usize {
        self.units.len()
    }

    fn sample_index(&self, seconds: f64) -> usize {
        (seconds.max(0.0) * self.sample_rate as f64).round() as usize
    }

    fn prune_finished(&mut self, now: f64) {
        self.units.retain(|_, unit| unit.end > now);
    }

    fn write_recording(&self, path: &Path) -> AppResult<()> {
        let header = wav::Header::new(WAV_FORMAT_PCM, 1, self.sample_rate, 16);
        let samples: Vec<i16> = self.timeline.iter().map(|&s| float_to_pcm16(s)).collect();

        let file = File::create(path).map_err(|e| {
            AppError::Internal(format!("cannot create recording {}: {}", path.display(), e))
        })?;
        let mut writer = BufWriter::new(file);
        wav::write(header, &wav::BitDepth::Sixteen(samples), &mut writer).map_err(|e| {
            AppError::Internal(format!("cannot write recording {}: {}", path.display(), e))
        })?;

        info!(
            path = %path.display(),
            seconds = self.recorded_seconds(),
            "Playback recording written"
        );
        Ok(())
    }
}

/// Nearest-sample rate conversion; only used when the server sends a rate
/// different from the one the sink was opened with.
fn resample_nearest(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || from == 0 || samples.is_empty() {
        return samples.to_vec();
    }
    let out_len = (samples.len() as u64 * to as u64 / from as u64) as usize;
    (0..out_len)
        .map(|i| {
            let src = (i as u64 * from as u64 / to as u64) as usize;
            samples[src.min(samples.len() - 1)]
        })
        .collect()
}

impl PlaybackSink for WavRecorderSink {
    fn current_time(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn start(&mut self, id: UnitId, unit: PlaybackUnit, at: f64) {
        if self.closed {
            warn!(%id, "Unit started on a closed playback sink, ignoring");
            return;
        }

        let now = self.current_time();
        self.prune_finished(now);

        let start_sample = self.sample_index(at);
        let samples = if self.record_path.is_some() {
            let samples = resample_nearest(&unit.samples, unit.sample_rate, self.sample_rate);
            let end_sample = start_sample + samples.len();
            if self.timeline.len() < end_sample {
                self.timeline.resize(end_sample, 0.0);
            }
            for (slot, sample) in self.timeline[start_sample..end_sample]
                .iter_mut()
                .zip(samples.iter())
            {
                *slot += sample;
            }
            samples
        } else {
            Vec::new()
        };

        let end = at + unit.duration();
        let delay = Duration::from_secs_f64((end - now).max(0.0));
        let completions = self.completions.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The session may already be gone
            let _ = completions.send(id);
        });

        self.units.insert(
            id,
            ScheduledUnit {
                start_sample,
                samples,
                end,
                timer,
            },
        );
    }

    fn stop(&mut self, id: UnitId) {
        let Some(unit) = self.units.remove(&id) else {
            return;
        };
        unit.timer.abort();

        // Remove whatever part of the unit had not been played yet
        let played_until = self.sample_index(self.current_time());
        let cut_from = played_until.max(unit.start_sample);
        let unit_end = unit.start_sample + unit.samples.len();
        for index in cut_from..unit_end.min(self.timeline.len()) {
            self.timeline[index] -= unit.samples[index - unit.start_sample];
        }
    }

    fn close(&mut self) -> AppResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        for (_, unit) in self.units.drain() {
            unit.timer.abort();
        }

        match self.record_path.clone() {
            Some(path) => self.write_recording(&path),
            None => Ok(()),
        }
    }
}

impl Drop for WavRecorderSink {
    fn drop(&mut self) {
        for unit in self.units.values() {
            unit.timer.abort();
        }
    }
}
