//! Scripted collaborators for session tests: a connector whose remote end is
//! driven by the test, capture sources that can be denied, and a playback sink
//! with a manual clock.

use crate::audio::capture::{CaptureProvider, CaptureRequest, CaptureSource};
use crate::audio::pcm::encode_pcm16_base64;
use crate::audio::playback::{
    CompletionSender, PlaybackProvider, PlaybackRequest, PlaybackSink, PlaybackUnit, UnitId,
};
use crate::error::{AppError, AppResult};
use crate::live::protocol::{LiveConnectConfig, ServerMessage};
use crate::live::transport::{LiveChannel, LiveConnector, Outbound, TransportEvent};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Poll `condition` until it holds; panics after two seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// A server message carrying `samples` samples of 24kHz audio.
pub fn audio_message(samples: usize) -> ServerMessage {
    let raw = serde_json::json!({
        "serverContent": {
            "modelTurn": {
                "parts": [{
                    "inlineData": {
                        "mimeType": "audio/pcm;rate=24000",
                        "data": encode_pcm16_base64(&vec![0.2; samples])
                    }
                }]
            }
        }
    });
    ServerMessage::parse(&raw.to_string()).unwrap()
}

// Connector

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConnectBehavior {
    Accept,
    Refuse,
    Hang,
}

/// The server side of a fake channel.
pub struct FakeRemote {
    events: mpsc::UnboundedSender<TransportEvent>,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl FakeRemote {
    pub fn send(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

pub struct FakeConnector {
    behavior: ConnectBehavior,
    connects: AtomicUsize,
    remote: Mutex<Option<FakeRemote>>,
}

impl FakeConnector {
    pub fn new(behavior: ConnectBehavior) -> Self {
        Self {
            behavior,
            connects: AtomicUsize::new(0),
            remote: Mutex::new(None),
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn take_remote(&self) -> Option<FakeRemote> {
        self.remote.lock().unwrap().take()
    }
}

#[async_trait]
impl LiveConnector for FakeConnector {
    async fn connect(&self, _config: &LiveConnectConfig) -> AppResult<LiveChannel> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            ConnectBehavior::Refuse => Err(AppError::Connection("connection refused".to_string())),
            ConnectBehavior::Hang => std::future::pending().await,
            ConnectBehavior::Accept => {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                let (event_tx, event_rx) = mpsc::unbounded_channel();
                *self.remote.lock().unwrap() = Some(FakeRemote {
                    events: event_tx,
                    outbound: outbound_rx,
                });
                Ok(LiveChannel::new(outbound_tx, event_rx, None, None))
            }
        }
    }
}

// Capture

#[derive(Debug, Default)]
pub struct CaptureLog {
    produced: AtomicUsize,
    released: AtomicBool,
}

impl CaptureLog {
    pub fn produced(&self) -> usize {
        self.produced.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// Yields `limit` chunks (or endless chunks every few milliseconds).
pub struct FakeCaptureSource {
    limit: Option<usize>,
    chunk_size: usize,
    log: Arc<CaptureLog>,
}

impl FakeCaptureSource {
    pub fn new(limit: Option<usize>, chunk_size: usize) -> (Self, Arc<CaptureLog>) {
        let log = Arc::new(CaptureLog::default());
        (
            Self {
                limit,
                chunk_size,
                log: log.clone(),
            },
            log,
        )
    }
}

#[async_trait]
impl CaptureSource for FakeCaptureSource {
    async fn next_chunk(&mut self) -> Option<Vec<f32>> {
        if self.log.is_released() {
            return None;
        }
        match self.limit {
            Some(limit) if self.log.produced() >= limit => return None,
            Some(_) => tokio::task::yield_now().await,
            None => tokio::time::sleep(Duration::from_millis(5)).await,
        }
        self.log.produced.fetch_add(1, Ordering::SeqCst);
        Some(vec![0.25; self.chunk_size])
    }

    fn release(&mut self) {
        self.log.released.store(true, Ordering::SeqCst);
    }
}

/// Capture provider that can deny access, like a refused microphone prompt.
pub struct FakeCapture {
    denied: AtomicBool,
    sources: Mutex<Vec<Arc<CaptureLog>>>,
}

impl FakeCapture {
    pub fn streaming() -> Self {
        Self {
            denied: AtomicBool::new(false),
            sources: Mutex::new(Vec::new()),
        }
    }

    pub fn denied() -> Self {
        let capture = Self::streaming();
        capture.denied.store(true, Ordering::SeqCst);
        capture
    }

    pub fn allow(&self) {
        self.denied.store(false, Ordering::SeqCst);
    }

    pub fn acquired(&self) -> usize {
        self.sources.lock().unwrap().len()
    }

    pub fn chunks_produced(&self) -> usize {
        self.sources.lock().unwrap().iter().map(|log| log.produced()).sum()
    }

    pub fn all_released(&self) -> bool {
        self.sources.lock().unwrap().iter().all(|log| log.is_released())
    }
}

#[async_trait]
impl CaptureProvider for FakeCapture {
    async fn acquire(&self, request: CaptureRequest) -> AppResult<Box<dyn CaptureSource>> {
        if self.denied.load(Ordering::SeqCst) {
            return Err(AppError::Permission("microphone access denied".to_string()));
        }
        let (source, log) = FakeCaptureSource::new(None, request.chunk_size);
        self.sources.lock().unwrap().push(log);
        Ok(Box::new(source))
    }
}

// Playback

#[derive(Default)]
struct SinkRecord {
    time: f64,
    started: Vec<(UnitId, f64)>,
    stopped: Vec<UnitId>,
    closed: bool,
    completions: Option<CompletionSender>,
}

/// Shared view of what a [`FakeSink`] was asked to do.
#[derive(Clone, Default)]
pub struct SinkLog {
    inner: Arc<Mutex<SinkRecord>>,
}

impl SinkLog {
    pub fn start_times(&self) -> Vec<f64> {
        self.inner.lock().unwrap().started.iter().map(|(_, at)| *at).collect()
    }

    pub fn stopped(&self) -> Vec<UnitId> {
        self.inner.lock().unwrap().stopped.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    pub fn set_time(&self, seconds: f64) {
        self.inner.lock().unwrap().time = seconds;
    }

    /// Report every started, not stopped unit as finished.
    pub fn finish_all(&self) {
        let record = self.inner.lock().unwrap();
        if let Some(completions) = &record.completions {
            for (id, _) in &record.started {
                if !record.stopped.contains(id) {
                    let _ = completions.send(*id);
                }
            }
        }
    }
}

/// Playback sink with a manually driven clock.
pub struct FakeSink {
    log: SinkLog,
}

impl FakeSink {
    pub fn new() -> (Self, SinkLog) {
        let log = SinkLog::default();
        (Self { log: log.clone() }, log)
    }
}

impl PlaybackSink for FakeSink {
    fn current_time(&self) -> f64 {
        self.log.inner.lock().unwrap().time
    }

    fn start(&mut self, id: UnitId, _unit: PlaybackUnit, at: f64) {
        self.log.inner.lock().unwrap().started.push((id, at));
    }

    fn stop(&mut self, id: UnitId) {
        self.log.inner.lock().unwrap().stopped.push(id);
    }

    fn close(&mut self) -> AppResult<()> {
        self.log.inner.lock().unwrap().closed = true;
        Ok(())
    }
}

pub struct FakePlayback {
    log: SinkLog,
}

impl FakePlayback {
    pub fn new() -> Self {
        Self {
            log: SinkLog::default(),
        }
    }

    pub fn log(&self) -> SinkLog {
        self.log.clone()
    }
}

impl PlaybackProvider for FakePlayback {
    fn open(
        &self,
        _request: &PlaybackRequest,
        completions: CompletionSender,
    ) -> AppResult<Box<dyn PlaybackSink>> {
        self.log.inner.lock().unwrap().completions = Some(completions);
        Ok(Box::new(FakeSink {
            log: self.log.clone(),
        }))
    }
}
