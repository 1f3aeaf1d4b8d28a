//! # Audio Capture
//!
//! The capture side of a voice session: something that yields fixed-size mono
//! float chunks at the input sample rate until it is released.
//!
//! ## Sources:
//! - **wav**: a prerecorded utterance streamed as if spoken into a microphone,
//!   followed by endless silence (a real microphone never stops producing)
//! - **silence**: zeros only, useful for connectivity checks
//!
//! With `realtime` pacing each chunk is released only after its own duration
//! has elapsed, so the upstream service sees the same cadence a live
//! microphone would produce (4096 samples at 16kHz ≈ every 256ms). Without
//! pacing the source ends after the recording instead of padding with
//! silence, so an unpaced source is always finite.
//!
//! ## Failure Mapping:
//! Anything that prevents acquiring the source (missing file, unreadable or
//! unsupported audio) is reported as `AppError::Permission`, the same category
//! a denied microphone prompt produces.

use crate::audio::pcm::pcm16_to_float;
use crate::config::CaptureConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info};

/// What the session needs from a capture device. `device` is the capture
/// section of the configuration the chat was started with.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub sample_rate: u32,
    pub chunk_size: usize,
    pub device: CaptureConfig,
}

impl CaptureRequest {
    /// Wall-clock duration of one chunk.
    pub fn chunk_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.chunk_size as f64 / self.sample_rate as f64)
    }
}

/// A live capture stream owned by exactly one session.
#[async_trait]
pub trait CaptureSource: Send {
    /// Next chunk of `chunk_size` samples, or `None` once the source has ended
    /// or been released.
    async fn next_chunk(&mut self) -> Option<Vec<f32>>;

    /// Stop capturing and free the device. Idempotent.
    fn release(&mut self);
}

/// Acquires capture sources (the "microphone permission prompt").
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    async fn acquire(&self, request: CaptureRequest) -> AppResult<Box<dyn CaptureSource>>;
}

/// Capture provider for the sources named in the `[capture]` section.
#[derive(Debug, Default, Clone)]
pub struct DeviceCaptureProvider;

#[async_trait]
impl CaptureProvider for DeviceCaptureProvider {
    async fn acquire(&self, request: CaptureRequest) -> AppResult<Box<dyn CaptureSource>> {
        if request.chunk_size == 0 {
            return Err(AppError::Permission(
                "capture chunk size must be greater than 0".to_string(),
            ));
        }

        let device = &request.device;
        let prerecorded = match device.source.as_str() {
            "silence" => Vec::new(),
            "wav" => {
                let path = PathBuf::from(&device.wav_path);
                let rate = request.sample_rate;
                tokio::task::spawn_blocking(move || load_wav_mono(&path, rate))
                    .await
                    .map_err(|e| AppError::Permission(format!("capture device task failed: {}", e)))??
            }
            other => {
                return Err(AppError::Permission(format!(
                    "capture source '{}' is not available",
                    other
                )))
            }
        };

        info!(
            source = %device.source,
            prerecorded_samples = prerecorded.len(),
            sample_rate = request.sample_rate,
            chunk_size = request.chunk_size,
            "Capture source acquired"
        );

        let pacing = device.realtime.then(|| request.chunk_duration());
        Ok(Box::new(StreamCaptureSource::new(
            prerecorded,
            request.chunk_size,
            pacing,
        )))
    }
}

/// Prerecorded samples, optionally paced in real time.
///
/// A paced source keeps sending silence after the recording, like a live
/// microphone. An unpaced source ends with the recording and yields to the
/// scheduler between chunks.
pub struct StreamCaptureSource {
    samples: Vec<f32>,
    position: usize,
    chunk_size: usize,
    pacing: Option<Duration>,
    ticker: Option<Interval>,
    released: bool,
}

impl StreamCaptureSource {
    pub fn new(samples: Vec<f32>, chunk_size: usize, pacing: Option<Duration>) -> Self {
        Self {
            samples,
            position: 0,
            chunk_size,
            pacing: pacing.filter(|d| !d.is_zero()),
            ticker: None,
            released: false,
        }
    }

    fn take_chunk(&mut self) -> Vec<f32> {
        let mut chunk = vec![0.0; self.chunk_size];
        let remaining = self.samples.len().saturating_sub(self.position);
        let count = remaining.min(self.chunk_size);
        chunk[..count].copy_from_slice(&self.samples[self.position..self.position + count]);
        self.position += count;
        chunk
    }
}

#[async_trait]
impl CaptureSource for StreamCaptureSource {
    async fn next_chunk(&mut self) -> Option<Vec<f32>> {
        if self.released {
            return None;
        }

        match self.pacing {
            Some(period) => {
                let ticker = self.ticker.get_or_insert_with(|| {
                    // First tick after one full chunk, like a microphone buffer filling up
                    let mut ticker = interval_after(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    ticker
                });
                ticker.tick().await;
            }
            None => {
                if self.position >= self.samples.len() {
                    debug!(sent_samples = self.position, "Unpaced capture source exhausted");
                    return None;
                }
                tokio::task::yield_now().await;
            }
        }

        Some(self.take_chunk())
    }

    fn release(&mut self) {
        if !self.released {
            debug!(sent_samples = self.position, "Capture source released");
        }
        self.released = true;
        self.ticker = None;
    }
}

fn interval_after(period: Duration) -> Interval {
    let start = tokio::time::Instant::now() + period;
    tokio::time::interval_at(start, period)
}

/// Read a WAV file into mono float samples at `expected_rate`.
///
/// Only the first channel is kept. The file rate must match the requested
/// input rate; there is no resampling on the capture path.
pub fn load_wav_mono(path: &std::path::Path, expected_rate: u32) -> AppResult<Vec<f32>> {
    let file = File::open(path).map_err(|e| {
        AppError::Permission(format!("cannot open capture file {}: {}", path.display(), e))
    })?;
    let mut reader = BufReader::new(file);

    let (header, data) = wav::read(&mut reader).map_err(|e| {
        AppError::Permission(format!("cannot read capture file {}: {}", path.display(), e))
    })?;

    if header.sampling_rate != expected_rate {
        return Err(AppError::Permission(format!(
            "capture file is {}Hz, expected {}Hz",
            header.sampling_rate, expected_rate
        )));
    }

    let channels = usize::from(header.channel_count.max(1));
    let interleaved: Vec<f32> = match data {
        wav::BitDepth::Eight(samples) => samples
            .into_iter()
            .map(|s| (s as f32 - 128.0) / 128.0)
            .collect(),
        wav::BitDepth::Sixteen(samples) => samples.into_iter().map(pcm16_to_float).collect(),
        wav::BitDepth::TwentyFour(samples) => samples
            .into_iter()
            .map(|s| s as f32 / 8_388_608.0)
            .collect(),
        wav::BitDepth::ThirtyTwoFloat(samples) => samples,
        wav::BitDepth::Empty => {
            return Err(AppError::Permission(format!(
                "capture file {} contains no audio",
                path.display()
            )))
        }
    };

    Ok(interleaved.into_iter().step_by(channels).collect())
}
