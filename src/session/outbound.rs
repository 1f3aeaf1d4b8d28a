//! # Outbound Audio Pipeline
//!
//! The capture pump: pulls chunks from the capture source, encodes each one as
//! an outbound frame and hands it to the transport writer. One frame per
//! chunk, no batching, no acknowledgement.
//!
//! The pump is started only after the server reports the session as opened
//! and shares nothing with the session worker except the lifecycle flag.

use crate::audio::capture::CaptureSource;
use crate::live::protocol::OutboundFrame;
use crate::live::transport::{Outbound, OutboundSender};
use crate::session::state::SessionCounters;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub fn spawn_capture_pump(
    source: Box<dyn CaptureSource>,
    outbound: OutboundSender,
    sample_rate: u32,
    stopped: watch::Receiver<bool>,
    counters: Arc<SessionCounters>,
) -> JoinHandle<()> {
    tokio::spawn(run_capture_pump(
        source,
        outbound,
        sample_rate,
        stopped,
        counters,
    ))
}

async fn run_capture_pump(
    mut source: Box<dyn CaptureSource>,
    outbound: OutboundSender,
    sample_rate: u32,
    mut stopped: watch::Receiver<bool>,
    counters: Arc<SessionCounters>,
) {
    info!(sample_rate, "Capture pump started");

    loop {
        let chunk = tokio::select! {
            biased;
            _ = stopped.wait_for(|stopped| *stopped) => break,
            chunk = source.next_chunk() => chunk,
        };
        let Some(chunk) = chunk else {
            debug!("Capture source ended");
            break;
        };

        // Produced in the same instant the session stopped
        if *stopped.borrow() {
            SessionCounters::incr(&counters.frames_discarded);
            break;
        }

        let frame = OutboundFrame::from_samples(&chunk, sample_rate);
        let payload_len = frame.payload_len() as u64;
        if outbound.send(Outbound::Message(frame.into_message())).is_err() {
            SessionCounters::incr(&counters.frames_discarded);
            break;
        }
        SessionCounters::incr(&counters.frames_sent);
        SessionCounters::add(&counters.bytes_sent, payload_len);
    }

    source.release();
    info!(
        frames_sent = counters.snapshot().frames_sent,
        "Capture pump stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::StreamCaptureSource;
    use crate::live::protocol::ClientMessage;
    use crate::session::testing::{wait_until, FakeCaptureSource};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_pump_sends_one_frame_per_chunk() {
        let (source, log) = FakeCaptureSource::new(Some(3), 4);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let counters = Arc::new(SessionCounters::default());

        spawn_capture_pump(Box::new(source), tx, 16_000, stop_rx, counters.clone())
            .await
            .unwrap();

        let mut frames = 0;
        while let Ok(outbound) = rx.try_recv() {
            match outbound {
                Outbound::Message(ClientMessage::RealtimeInput(input)) => {
                    assert_eq!(input.media_chunks.len(), 1);
                    assert_eq!(input.media_chunks[0].mime_type, "audio/pcm;rate=16000");
                    frames += 1;
                }
                other => panic!("unexpected outbound {:?}", other),
            }
        }
        assert_eq!(frames, 3);
        assert_eq!(counters.frames_sent.load(Ordering::Relaxed), 3);
        assert!(log.is_released());
    }

    #[tokio::test]
    async fn test_pump_stops_on_lifecycle_flag() {
        let (source, log) = FakeCaptureSource::new(None, 4);
        let (tx, _rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let counters = Arc::new(SessionCounters::default());

        let pump = spawn_capture_pump(Box::new(source), tx, 16_000, stop_rx, counters.clone());
        wait_until(|| counters.frames_sent.load(Ordering::Relaxed) >= 2).await;

        stop_tx.send(true).unwrap();
        pump.await.unwrap();

        let sent = counters.frames_sent.load(Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(counters.frames_sent.load(Ordering::Relaxed), sent);
        assert!(log.is_released());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unpaced_capture_sends_the_recording_once_and_stops() {
        let source = StreamCaptureSource::new(vec![0.25; 4096 * 10], 4096, None);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let counters = Arc::new(SessionCounters::default());

        let pump = spawn_capture_pump(Box::new(source), tx, 16_000, stop_rx, counters.clone());
        tokio::time::timeout(Duration::from_millis(200), pump)
            .await
            .expect("unpaced pump must finish on its own")
            .unwrap();

        assert_eq!(counters.frames_sent.load(Ordering::Relaxed), 10);
        let mut queued = 0;
        while rx.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unpaced_silence_sends_nothing() {
        let source = StreamCaptureSource::new(Vec::new(), 4096, None);
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let counters = Arc::new(SessionCounters::default());

        let pump = spawn_capture_pump(Box::new(source), tx, 16_000, stop_rx, counters.clone());
        tokio::time::timeout(Duration::from_millis(200), pump)
            .await
            .expect("unpaced pump must finish on its own")
            .unwrap();
        assert_eq!(counters.frames_sent.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_frames_discarded_when_writer_is_gone() {
        let (source, log) = FakeCaptureSource::new(None, 4);
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let counters = Arc::new(SessionCounters::default());

        spawn_capture_pump(Box::new(source), tx, 16_000, stop_rx, counters.clone())
            .await
            .unwrap();

        assert_eq!(counters.frames_sent.load(Ordering::Relaxed), 0);
        assert_eq!(counters.frames_discarded.load(Ordering::Relaxed), 1);
        assert!(log.is_released());
    }
}
