//! Heart-rate tracking from accepted beats.
//!
//! Each pair of consecutive `Beat` events yields one R-R interval and one
//! instantaneous BPM reading. Artifacts are ignored.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffering::Timestamp;
use crate::ipc::events::Event;

/// R-R intervals kept for the rolling average.
pub const RR_WINDOW: usize = 60;

/// BPM points kept for the trend display.
pub const BPM_HISTORY: usize = 300;

/// One instantaneous heart-rate reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BpmPoint {
    pub timestamp: Timestamp,
    pub bpm: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartRateSnapshot {
    /// From the most recent R-R interval.
    pub current_bpm: Option<f32>,
    /// From the mean of the retained R-R intervals.
    pub average_bpm: Option<f32>,
    pub rr_intervals_ms: Vec<f32>,
    pub history: Vec<BpmPoint>,
    pub last_beat: Option<Timestamp>,
}

#[derive(Debug, Clone, Default)]
pub struct HeartRateTracker {
    last_beat: Option<Timestamp>,
    rr: VecDeque<Duration>,
    history: VecDeque<BpmPoint>,
}

impl HeartRateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed any event; only beats are counted.
    pub fn observe(&mut self, event: &Event) {
        if !event.is_beat() {
            return;
        }
        if let Some(previous) = self.last_beat {
            let rr = event.timestamp.saturating_sub(previous);
            if !rr.is_zero() {
                if self.rr.len() == RR_WINDOW {
                    self.rr.pop_front();
                }
                self.rr.push_back(rr);

                if self.history.len() == BPM_HISTORY {
                    self.history.pop_front();
                }
                self.history.push_back(BpmPoint {
                    timestamp: event.timestamp,
                    bpm: bpm_from_interval(rr),
                });
            }
        }
        self.last_beat = Some(event.timestamp);
    }

    pub fn current_bpm(&self) -> Option<f32> {
        self.rr.back().map(|&rr| bpm_from_interval(rr))
    }

    pub fn average_bpm(&self) -> Option<f32> {
        if self.rr.is_empty() {
            return None;
        }
        let mean = self.rr.iter().sum::<Duration>() / self.rr.len() as u32;
        Some(bpm_from_interval(mean))
    }

    pub fn snapshot(&self) -> HeartRateSnapshot {
        HeartRateSnapshot {
            current_bpm: self.current_bpm(),
            average_bpm: self.average_bpm(),
            rr_intervals_ms: self
                .rr
                .iter()
                .map(|rr| rr.as_secs_f32() * 1_000.0)
                .collect(),
            history: self.history.iter().copied().collect(),
            last_beat: self.last_beat,
        }
    }

    pub fn reset(&mut self) {
        self.last_beat = None;
        self.rr.clear();
        self.history.clear();
    }
}

fn bpm_from_interval(rr: Duration) -> f32 {
    60.0 / rr.as_secs_f32()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::events::EventKind;
    use approx::assert_relative_eq;

    fn event(ms: u64, kind: EventKind) -> Event {
        Event {
            timestamp: Timestamp::from_millis(ms),
            amplitude_at_peak: 1_000.0,
            kind,
        }
    }

    #[test]
    fn bpm_from_800ms_spacing_is_75() {
        let mut tracker = HeartRateTracker::new();
        for k in 0..5 {
            tracker.observe(&event(1_000 + k * 800, EventKind::Beat));
        }
        let snap = tracker.snapshot();
        assert_relative_eq!(snap.current_bpm.unwrap_or_default(), 75.0, epsilon = 1e-3);
        assert_relative_eq!(snap.average_bpm.unwrap_or_default(), 75.0, epsilon = 1e-3);
        assert_eq!(snap.rr_intervals_ms.len(), 4);
        assert_eq!(snap.history.len(), 4);
        assert_eq!(snap.last_beat, Some(Timestamp::from_millis(4_200)));
    }

    #[test]
    fn artifacts_do_not_count() {
        let mut tracker = HeartRateTracker::new();
        tracker.observe(&event(0, EventKind::Beat));
        tracker.observe(&event(100, EventKind::ArtifactSuspected));
        tracker.observe(&event(1_000, EventKind::Beat));
        assert_relative_eq!(tracker.current_bpm().unwrap_or_default(), 60.0, epsilon = 1e-3);
    }

    #[test]
    fn single_beat_has_no_rate() {
        let mut tracker = HeartRateTracker::new();
        tracker.observe(&event(500, EventKind::Beat));
        assert_eq!(tracker.current_bpm(), None);
        assert_eq!(tracker.average_bpm(), None);
    }

    #[test]
    fn windows_are_bounded_and_reset_clears() {
        let mut tracker = HeartRateTracker::new();
        for k in 0..(BPM_HISTORY as u64 + 10) {
            tracker.observe(&event(k * 1_000, EventKind::Beat));
        }
        let snap = tracker.snapshot();
        assert_eq!(snap.rr_intervals_ms.len(), RR_WINDOW);
        assert_eq!(snap.history.len(), BPM_HISTORY);

        tracker.reset();
        assert_eq!(tracker.snapshot(), HeartRateSnapshot::default());
    }
}
