//! # Playback Scheduling
//!
//! Turns decoded inbound audio into gapless, correctly ordered playback even
//! though frames arrive over the network at irregular, bursty intervals.
//!
//! ## Scheduling Algorithm:
//! A single cursor holds the earliest time the *next* unit may start. For each
//! newly decoded unit:
//! 1. `cursor = max(cursor, current output clock)`, never schedule in the past
//! 2. the unit starts exactly at `cursor`
//! 3. `cursor += unit duration`, so the following unit is back-to-back
//! 4. the unit joins the active set until it finishes or is interrupted
//!
//! ## Interruption (barge-in):
//! Every active unit is stopped, the set is cleared and the cursor goes back to
//! zero, so the next unit is scheduled from the live clock instead of behind
//! the discarded queue.

use crate::audio::pcm::duration_seconds;
use crate::error::AppResult;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identifier of a scheduled playback unit, unique within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(pub u64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit-{}", self.0)
    }
}

/// A decoded mono audio buffer ready to be handed to a playback sink.
#[derive(Debug, Clone)]
pub struct PlaybackUnit {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
}

impl PlaybackUnit {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        duration_seconds(self.samples.len(), self.sample_rate)
    }
}

/// Where and when a unit was placed on the output timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSlot {
    pub id: UnitId,
    pub start: f64,
    pub duration: f64,
}

impl ScheduledSlot {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Cursor plus active set. Pure bookkeeping: the clock value is passed in so
/// the algorithm can be tested without an audio device.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    next_start_time: f64,
    active: BTreeMap<UnitId, ScheduledSlot>,
    next_id: u64,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a unit of `duration` seconds given the live output clock `now`.
    pub fn schedule(&mut self, now: f64, duration: f64) -> ScheduledSlot {
        self.next_start_time = self.next_start_time.max(now);

        let slot = ScheduledSlot {
            id: UnitId(self.next_id),
            start: self.next_start_time,
            duration,
        };
        self.next_id += 1;

        self.next_start_time += duration;
        self.active.insert(slot.id, slot);
        slot
    }

    /// A unit finished playing naturally. Returns false for units that were
    /// already removed (e.g. by an interruption that raced the completion).
    pub fn complete(&mut self, id: UnitId) -> bool {
        self.active.remove(&id).is_some()
    }

    /// Clear the active set and reset the cursor. Returns the units that must
    /// be stopped on the sink, in scheduling order.
    pub fn interrupt(&mut self) -> Vec<UnitId> {
        let stopped: Vec<UnitId> = self.active.keys().copied().collect();
        self.active.clear();
        self.next_start_time = 0.0;
        stopped
    }

    pub fn cursor(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, id: UnitId) -> bool {
        self.active.contains_key(&id)
    }
}

/// Channel on which a sink reports units that finished playing naturally.
pub type CompletionSender = mpsc::UnboundedSender<UnitId>;
pub type CompletionReceiver = mpsc::UnboundedReceiver<UnitId>;

/// An audio output able to play buffers at absolute times on its own clock.
///
/// ## Contract:
/// - `current_time()` is the live output clock in seconds, non-decreasing
/// - `start()` plays `unit` beginning exactly at `at` (which is never in the
///   past when called by the scheduler)
/// - when a unit ends on its own, its id is sent on the completion channel the
///   sink was opened with; stopped units are not reported
/// - `close()` releases the device; later calls are no-ops
pub trait PlaybackSink: Send {
    fn current_time(&self) -> f64;

    fn start(&mut self, id: UnitId, unit: PlaybackUnit, at: f64);

    fn stop(&mut self, id: UnitId);

    fn close(&mut self) -> AppResult<()>;
}

/// Parameters for opening an output device.
#[derive(Debug, Clone)]
pub struct PlaybackRequest {
    pub sample_rate: u32,
    pub record_path: Option<std::path::PathBuf>,
}

/// Opens playback sinks. One sink is owned by each session.
pub trait PlaybackProvider: Send + Sync {
    fn open(
        &self,
        request: &PlaybackRequest,
        completions: CompletionSender,
    ) -> AppResult<Box<dyn PlaybackSink>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_back_to_back_scheduling() {
        let mut scheduler = PlaybackScheduler::new();

        let a = scheduler.schedule(0.0, 0.5);
        let b = scheduler.schedule(0.0, 0.5);
        let c = scheduler.schedule(0.1, 0.5);

        assert_eq!(a.start, 0.0);
        assert_eq!(b.start, 0.5);
        assert_eq!(c.start, 1.0);
        assert_eq!(scheduler.cursor(), 1.5);
        assert_eq!(scheduler.active_len(), 3);
    }

    #[test]
    fn test_never_schedules_in_the_past() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.schedule(0.0, 0.25);

        // The clock ran past the queued audio: catch up instead of lagging
        let late = scheduler.schedule(3.0, 0.25);
        assert_eq!(late.start, 3.0);
        assert_eq!(scheduler.cursor(), 3.25);
    }

    #[test]
    fn test_completion_removes_unit_once() {
        let mut scheduler = PlaybackScheduler::new();
        let slot = scheduler.schedule(0.0, 1.0);

        assert!(scheduler.complete(slot.id));
        assert!(!scheduler.complete(slot.id));
        assert_eq!(scheduler.active_len(), 0);
        // Completion does not move the cursor
        assert_eq!(scheduler.cursor(), 1.0);
    }

    #[test]
    fn test_interrupt_clears_and_resets() {
        let mut scheduler = PlaybackScheduler::new();
        let first = scheduler.schedule(1.0, 2.0);
        let second = scheduler.schedule(1.0, 2.0);

        let stopped = scheduler.interrupt();
        assert_eq!(stopped, vec![first.id, second.id]);
        assert_eq!(scheduler.active_len(), 0);
        assert_eq!(scheduler.cursor(), 0.0);

        // Fresh audio starts at "now", not after the discarded 4 seconds
        let fresh = scheduler.schedule(1.5, 0.5);
        assert_eq!(fresh.start, 1.5);
        assert!(!scheduler.complete(first.id));
    }

    #[test]
    fn test_unit_ids_are_unique_across_interruptions() {
        let mut scheduler = PlaybackScheduler::new();
        let before = scheduler.schedule(0.0, 0.1);
        scheduler.interrupt();
        let after = scheduler.schedule(0.0, 0.1);
        assert_ne!(before.id, after.id);
    }

    #[test]
    fn test_unit_duration() {
        let unit = PlaybackUnit::new(vec![0.0; 12_000], 24_000);
        assert_eq!(unit.duration(), 0.5);
    }

    proptest! {
        #[test]
        fn prop_schedule_is_contiguous(
            first_clock in 0.0f64..10.0,
            durations in prop::collection::vec(0.001f64..2.0, 1..40),
        ) {
            let mut scheduler = PlaybackScheduler::new();
            // Later arrivals see a clock that never passes the queued audio
            let slots: Vec<ScheduledSlot> = durations
                .iter()
                .map(|&d| scheduler.schedule(first_clock, d))
                .collect();

            prop_assert!(slots[0].start >= first_clock);
            for pair in slots.windows(2) {
                prop_assert!((pair[1].start - pair[0].end()).abs() < 1e-9);
            }
        }

        #[test]
        fn prop_cursor_never_moves_backward_without_interrupt(
            arrivals in prop::collection::vec((0.0f64..5.0, 0.001f64..1.0), 1..40),
        ) {
            let mut scheduler = PlaybackScheduler::new();
            let mut clock = 0.0f64;
            let mut last_cursor = scheduler.cursor();
            for (advance, duration) in arrivals {
                clock += advance;
                let slot = scheduler.schedule(clock, duration);
                prop_assert!(slot.start >= clock);
                prop_assert!(scheduler.cursor() >= last_cursor);
                last_cursor = scheduler.cursor();
            }
        }
    }
}
