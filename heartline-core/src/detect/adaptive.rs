//! Adaptive-threshold beat detector with refractory window.
//!
//! ## Algorithm
//!
//! 1. Warm-up: buffer the first `warmup_ms` of samples, then seed the baseline
//!    `B` with their mean and the variability `V` with their mean absolute
//!    deviation. No events are emitted while warming up.
//! 2. Every later sample `x` is first classified against
//!    `Θ = B + k·max(V, floor)`, then absorbed:
//!    `B ← B + α(x − B)`, `V ← V + α(|x − B| − V)`.
//! 3. An upward crossing (previous sample ≤ Θ, current > Θ) opens a
//!    peak-search window of `peak_window_ms`; the largest sample inside it is
//!    the candidate peak.
//! 4. When the window closes the candidate becomes a `Beat`, unless the
//!    crossing fell inside the refractory window after the last beat or the
//!    peak is more than `max_deviation` away from the baseline seen at the
//!    crossing. Those become `ArtifactSuspected` (or nothing, per policy).
//! 5. Only beats restart the refractory timer.
//!
//! ```text
//! Warmup ──► Idle ──crossing──► PeakSearch ──window closed──► Idle (emit | discard)
//!   ▲                                                           │
//!   └──────────────────────────── reset() ◄─────────────────────┘
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{BeatDetector, DetectorPhase};
use crate::buffering::{Sample, Timestamp};
use crate::error::{HeartlineError, Result};
use crate::ipc::events::{Event, EventKind};

/// Longest accepted warm-up.
pub const MAX_WARMUP_MS: u64 = 10_000;

/// Warm-up samples kept for seeding; later ones only extend the wait.
const MAX_SEED_SAMPLES: usize = 10_000;

/// What to do with a candidate that fails the plausibility checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactPolicy {
    /// Emit it as `EventKind::ArtifactSuspected`.
    #[default]
    Emit,
    /// Drop it silently.
    Suppress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct DetectorConfig {
    /// EWMA smoothing factor per sample. Typical range: 0.01–0.05.
    pub alpha: f32,
    /// Threshold multiplier `k` on the variability. Typical range: 2.5–4.
    pub sensitivity: f32,
    /// Minimum plausible inter-beat interval.
    pub refractory_ms: u64,
    /// How long to keep tracking the maximum after a crossing.
    pub peak_window_ms: u64,
    /// Calibration interval at stream start and after reset.
    pub warmup_ms: u64,
    /// Lower bound on `V` so a perfectly flat warm-up still yields a usable threshold.
    pub variability_floor: f32,
    /// Peaks further than this from the baseline (counts) are treated as saturation.
    pub max_deviation: f32,
    pub artifact_policy: ArtifactPolicy,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            alpha: 0.02,
            sensitivity: 3.0,
            refractory_ms: 250,
            peak_window_ms: 60,
            warmup_ms: 1_000,
            variability_floor: 1.0,
            max_deviation: 30_000.0,
            artifact_policy: ArtifactPolicy::Emit,
        }
    }
}

impl DetectorConfig {
    pub fn refractory(&self) -> Duration {
        Duration::from_millis(self.refractory_ms)
    }

    pub fn peak_window(&self) -> Duration {
        Duration::from_millis(self.peak_window_ms)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(HeartlineError::Configuration(msg));

        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return bad(format!("detector alpha {} outside (0, 1]", self.alpha));
        }
        if !(self.sensitivity.is_finite() && self.sensitivity > 0.0) {
            return bad(format!("detector sensitivity {} must be > 0", self.sensitivity));
        }
        if !(self.variability_floor.is_finite() && self.variability_floor >= 0.0) {
            return bad(format!(
                "variability floor {} must be >= 0",
                self.variability_floor
            ));
        }
        if self.max_deviation.is_nan() || self.max_deviation <= 0.0 {
            return bad(format!("max deviation {} must be > 0", self.max_deviation));
        }
        if self.warmup_ms == 0 || self.warmup_ms > MAX_WARMUP_MS {
            return bad(format!(
                "warm-up {} ms outside 1..={MAX_WARMUP_MS} ms",
                self.warmup_ms
            ));
        }
        if self.peak_window_ms == 0 || self.peak_window_ms >= self.refractory_ms {
            return bad(format!(
                "peak window {} ms must be in 1..{} ms (refractory)",
                self.peak_window_ms, self.refractory_ms
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Warmup {
    started: Option<Timestamp>,
    seed: Vec<f32>,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    crossed_at: Timestamp,
    peak_at: Timestamp,
    peak: f32,
    /// Baseline at the crossing, before the pulse dragged it upwards.
    baseline: f32,
    in_refractory: bool,
}

#[derive(Debug, Clone)]
enum Phase {
    Warmup(Warmup),
    Idle,
    PeakSearch(Candidate),
}

impl Phase {
    fn warmup() -> Self {
        Phase::Warmup(Warmup {
            started: None,
            seed: Vec::new(),
        })
    }
}

/// Online QRS detector. See the module docs for the algorithm.
#[derive(Debug, Clone)]
pub struct AdaptiveDetector {
    config: DetectorConfig,
    phase: Phase,
    baseline: f32,
    variability: f32,
    /// Previous classified sample was at or below the threshold.
    armed: bool,
    last_beat: Option<Timestamp>,
}

impl AdaptiveDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            phase: Phase::warmup(),
            baseline: 0.0,
            variability: 0.0,
            armed: false,
            last_beat: None,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn baseline(&self) -> f32 {
        self.baseline
    }

    pub fn variability(&self) -> f32 {
        self.variability
    }

    /// Current detection threshold `Θ`.
    pub fn threshold(&self) -> f32 {
        self.baseline
            + self.config.sensitivity * self.variability.max(self.config.variability_floor)
    }

    pub fn last_beat(&self) -> Option<Timestamp> {
        self.last_beat
    }

    /// `last` is the sample that completed warm-up; it arms the detector if
    /// it already sits at or below the new threshold.
    fn seed_statistics(&mut self, seed: &[f32], last: f32) {
        if seed.is_empty() {
            return;
        }
        let n = seed.len() as f64;
        let mean = seed.iter().map(|&x| f64::from(x)).sum::<f64>() / n;
        let mad = seed.iter().map(|&x| (f64::from(x) - mean).abs()).sum::<f64>() / n;
        self.baseline = mean as f32;
        self.variability = mad as f32;
        self.armed = last <= self.threshold();
    }

    fn update_statistics(&mut self, x: f32) {
        let alpha = self.config.alpha;
        self.baseline += alpha * (x - self.baseline);
        self.variability += alpha * ((x - self.baseline).abs() - self.variability);
    }

    /// Idle-state handling; may open a peak search.
    fn watch_for_crossing(&mut self, sample: &Sample, threshold: f32) {
        if sample.amplitude <= threshold {
            self.armed = true;
            return;
        }
        if !self.armed {
            return;
        }
        self.armed = false;
        let in_refractory = self
            .last_beat
            .is_some_and(|beat| sample.timestamp.saturating_sub(beat) < self.config.refractory());
        self.phase = Phase::PeakSearch(Candidate {
            crossed_at: sample.timestamp,
            peak_at: sample.timestamp,
            peak: sample.amplitude,
            baseline: self.baseline,
            in_refractory,
        });
    }

    fn close(&mut self, candidate: Candidate) -> Option<Event> {
        let saturated = (candidate.peak - candidate.baseline).abs() > self.config.max_deviation;
        let kind = if candidate.in_refractory || saturated {
            EventKind::ArtifactSuspected
        } else {
            EventKind::Beat
        };

        if kind == EventKind::Beat {
            self.last_beat = Some(candidate.peak_at);
        } else if self.config.artifact_policy == ArtifactPolicy::Suppress {
            return None;
        }

        Some(Event {
            timestamp: candidate.peak_at,
            amplitude_at_peak: candidate.peak,
            kind,
        })
    }
}

impl Default for AdaptiveDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl BeatDetector for AdaptiveDetector {
    fn consume(&mut self, sample: &Sample) -> Option<Event> {
        let x = sample.amplitude;
        if !x.is_finite() {
            return None;
        }

        let threshold = self.threshold();
        let mut event = None;

        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Warmup(mut warmup) => {
                let started = *warmup.started.get_or_insert(sample.timestamp);
                if warmup.seed.len() < MAX_SEED_SAMPLES {
                    warmup.seed.push(x);
                }
                if sample.timestamp.saturating_sub(started) >= self.config.warmup() {
                    self.seed_statistics(&warmup.seed, x);
                } else {
                    self.phase = Phase::Warmup(warmup);
                }
                return None;
            }
            Phase::Idle => self.watch_for_crossing(sample, threshold),
            Phase::PeakSearch(mut candidate) => {
                if sample.timestamp.saturating_sub(candidate.crossed_at)
                    <= self.config.peak_window()
                {
                    if x > candidate.peak {
                        candidate.peak = x;
                        candidate.peak_at = sample.timestamp;
                    }
                    self.phase = Phase::PeakSearch(candidate);
                } else {
                    event = self.close(candidate);
                    // Disarmed since the crossing, so this can only re-arm.
                    self.watch_for_crossing(sample, threshold);
                }
            }
        }

        self.update_statistics(x);
        event
    }

    fn reset(&mut self) {
        self.phase = Phase::warmup();
        self.baseline = 0.0;
        self.variability = 0.0;
        self.armed = false;
        self.last_beat = None;
    }

    fn phase(&self) -> DetectorPhase {
        match self.phase {
            Phase::Warmup(_) => DetectorPhase::Warmup,
            Phase::Idle => DetectorPhase::Idle,
            Phase::PeakSearch(_) => DetectorPhase::PeakSearch,
        }
    }
}
