//! Fixed-rate sample loop.
//!
//! ## Per tick
//!
//! ```text
//! 1. Honour a pending reset (detector → Warmup, history cleared)
//! 2. Sleep until the scheduled deadline
//! 3. SampleSource::read
//!    ├─ Ok  → Sample{scheduled time} → WaveformBuffer::push → BeatDetector::consume
//!    │        └─ Event → EventLog / HeartRateTracker / broadcast
//!    └─ Err → skip the tick; N consecutive → Paused(SourceUnavailable)
//! 4. Next deadline = scheduled + T, or "now" if more than one period behind
//! ```
//!
//! Samples are stamped with the *scheduled* time, so read latency never
//! accumulates into the timestamps. The loop runs on one dedicated thread,
//! which is the only writer of the waveform and the only caller into the
//! detector.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    buffering::{EventLog, Sample, Timestamp, WaveformBuffer},
    detect::{BeatDetector, HeartRateTracker},
    engine::clock::Clock,
    error::{AcquisitionError, HeartlineError},
    ipc::events::{Event, EventKind, HealthEvent, HealthStatus, PauseReason},
    source::SampleSource,
};

pub struct SamplerDiagnostics {
    pub ticks: AtomicUsize,
    pub samples: AtomicUsize,
    pub skipped: AtomicUsize,
    pub events: AtomicUsize,
    pub beats: AtomicUsize,
    pub artifacts: AtomicUsize,
    pub drift_resyncs: AtomicUsize,
}

impl Default for SamplerDiagnostics {
    fn default() -> Self {
        Self {
            ticks: AtomicUsize::new(0),
            samples: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            events: AtomicUsize::new(0),
            beats: AtomicUsize::new(0),
            artifacts: AtomicUsize::new(0),
            drift_resyncs: AtomicUsize::new(0),
        }
    }
}

impl SamplerDiagnostics {
    pub fn reset(&self) {
        self.ticks.store(0, Ordering::Relaxed);
        self.samples.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
        self.events.store(0, Ordering::Relaxed);
        self.beats.store(0, Ordering::Relaxed);
        self.artifacts.store(0, Ordering::Relaxed);
        self.drift_resyncs.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            beats: self.beats.load(Ordering::Relaxed),
            artifacts: self.artifacts.load(Ordering::Relaxed),
            drift_resyncs: self.drift_resyncs.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub ticks: usize,
    pub samples: usize,
    pub skipped: usize,
    pub events: usize,
    pub beats: usize,
    pub artifacts: usize,
    pub drift_resyncs: usize,
}

/// Everything the sample loop needs, passed as one struct so the thread closure stays tidy.
pub struct SamplerContext<S = Box<dyn SampleSource>> {
    /// Nominal tick period `T`.
    pub period: Duration,
    /// Consecutive failures before the stream is reported as paused.
    pub failure_threshold: u32,
    pub source: S,
    pub detector: Box<dyn BeatDetector>,
    pub clock: Arc<dyn Clock>,
    pub waveform: Arc<WaveformBuffer>,
    pub events: Arc<EventLog>,
    pub heart_rate: Arc<Mutex<HeartRateTracker>>,
    pub running: Arc<AtomicBool>,
    /// Bumped by `Pipeline::reset`; the sampler resets when it sees a new value.
    pub reset_epoch: Arc<AtomicU64>,
    pub health: Arc<Mutex<HealthStatus>>,
    pub event_tx: broadcast::Sender<Event>,
    pub health_tx: broadcast::Sender<HealthEvent>,
    pub diagnostics: Arc<SamplerDiagnostics>,
}

/// Result of one `Sampler::tick`.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Sampled {
        sample: Sample,
        event: Option<Event>,
    },
    Skipped(AcquisitionError),
}

pub struct Sampler<S = Box<dyn SampleSource>> {
    ctx: SamplerContext<S>,
    next_deadline: Option<Duration>,
    consecutive_failures: u32,
    seen_epoch: u64,
}

impl<S: SampleSource> Sampler<S> {
    pub fn new(ctx: SamplerContext<S>) -> Self {
        let seen_epoch = ctx.reset_epoch.load(Ordering::Acquire);
        Self {
            ctx,
            next_deadline: None,
            consecutive_failures: 0,
            seen_epoch,
        }
    }

    /// Deadline of the next tick; `None` before the first tick.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.next_deadline
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Run until the running flag is cleared, then hand the source back.
    ///
    /// The flag is checked once per tick, never during a read.
    pub fn run(mut self) -> S {
        info!(
            period_us = self.ctx.period.as_micros() as u64,
            failure_threshold = self.ctx.failure_threshold,
            "sampler started"
        );

        while self.ctx.running.load(Ordering::Acquire) {
            self.tick();
        }

        info!(
            samples = self.ctx.diagnostics.samples.load(Ordering::Relaxed),
            skipped = self.ctx.diagnostics.skipped.load(Ordering::Relaxed),
            "sampler stopped"
        );
        self.ctx.source
    }

    /// Perform exactly one scheduled tick.
    pub fn tick(&mut self) -> TickOutcome {
        self.apply_pending_reset();

        let clock = Arc::clone(&self.ctx.clock);
        let scheduled = *self.next_deadline.get_or_insert_with(|| clock.now());
        clock.sleep_until(scheduled);
        self.ctx.diagnostics.ticks.fetch_add(1, Ordering::Relaxed);

        let outcome = match self.ctx.source.read() {
            Ok(amplitude) => {
                let sample = Sample::new(Timestamp::from_duration(scheduled), amplitude);
                self.on_sample(sample)
            }
            Err(e) => self.on_failure(e),
        };

        self.schedule_next(scheduled);
        outcome
    }

    fn schedule_next(&mut self, scheduled: Duration) {
        let period = self.ctx.period;
        let on_grid = scheduled + period;
        let now = self.ctx.clock.now();

        // More than one whole period behind: restart the grid instead of
        // firing a burst of catch-up ticks.
        let next = if now > on_grid + period {
            self.ctx
                .diagnostics
                .drift_resyncs
                .fetch_add(1, Ordering::Relaxed);
            debug!(
                behind_us = (now - on_grid).as_micros() as u64,
                "sampler behind schedule, re-anchoring"
            );
            now
        } else {
            on_grid
        };
        self.next_deadline = Some(next);
    }

    fn on_sample(&mut self, sample: Sample) -> TickOutcome {
        if self.consecutive_failures >= self.ctx.failure_threshold {
            info!(
                after_failures = self.consecutive_failures,
                "sample source recovered"
            );
            self.set_health(HealthStatus::Running, None);
        }
        self.consecutive_failures = 0;

        self.ctx.waveform.push(sample);
        self.ctx.diagnostics.samples.fetch_add(1, Ordering::Relaxed);

        let event = self.ctx.detector.consume(&sample);
        if let Some(ev) = event {
            self.record_event(ev);
        }

        TickOutcome::Sampled { sample, event }
    }

    fn record_event(&self, event: Event) {
        self.ctx.events.append(event);
        self.ctx.heart_rate.lock().observe(&event);

        let diag = &self.ctx.diagnostics;
        diag.events.fetch_add(1, Ordering::Relaxed);
        match event.kind {
            EventKind::Beat => diag.beats.fetch_add(1, Ordering::Relaxed),
            EventKind::ArtifactSuspected => diag.artifacts.fetch_add(1, Ordering::Relaxed),
        };

        debug!(
            timestamp_ms = event.timestamp.as_millis(),
            amplitude = event.amplitude_at_peak,
            kind = ?event.kind,
            "event detected"
        );
        let _ = self.ctx.event_tx.send(event);
    }

    fn on_failure(&mut self, err: AcquisitionError) -> TickOutcome {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.ctx.diagnostics.skipped.fetch_add(1, Ordering::Relaxed);
        warn!(
            error = %err,
            consecutive = self.consecutive_failures,
            "acquisition failed, skipping tick"
        );

        if self.consecutive_failures == self.ctx.failure_threshold {
            error!(
                consecutive = self.consecutive_failures,
                "sample source unavailable, pausing stream"
            );
            let unavailable = HeartlineError::SourceUnavailable {
                consecutive: self.consecutive_failures,
            };
            self.set_health(
                HealthStatus::Paused(PauseReason::SourceUnavailable),
                Some(format!("{unavailable}: {err}")),
            );
        }
        TickOutcome::Skipped(err)
    }

    fn apply_pending_reset(&mut self) {
        let epoch = self.ctx.reset_epoch.load(Ordering::Acquire);
        if epoch == self.seen_epoch {
            return;
        }
        self.seen_epoch = epoch;
        self.ctx.detector.reset();
        self.ctx.waveform.clear();
        self.ctx.events.clear();
        self.ctx.heart_rate.lock().reset();
        info!("sampler state reset, detector back in warm-up");
    }

    fn set_health(&self, status: HealthStatus, detail: Option<String>) {
        *self.ctx.health.lock() = status;
        let _ = self.ctx.health_tx.send(HealthEvent { status, detail });
    }
}
