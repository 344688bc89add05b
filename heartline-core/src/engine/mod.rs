//! `Pipeline` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! Pipeline::new(source)
//!     └─► start(config)   → source configured, sampler spawned, health = Running
//!         └─► reset()     → history cleared, detector back in Warmup
//!         └─► stop()      → running=false, sampler joined, health = Stopped
//! ```
//!
//! `start()`/`stop()` return an error in the wrong state rather than
//! panicking. The sampler thread hands the source back when it exits, so a
//! stopped pipeline can be started again with a different configuration.
//!
//! ## Sharing
//!
//! Each `Pipeline` owns its buffers, channels and flags; two instances never
//! share state. All fields use interior mutability, so the handle can be
//! wrapped in an `Arc` and read from any number of consumer threads.

pub mod clock;
pub mod sampler;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    buffering::{
        smoothed, EventCounts, EventLog, Sample, Timestamp, WaveformBuffer,
        DEFAULT_EVENT_CAPACITY,
    },
    detect::{AdaptiveDetector, BeatDetector, DetectorConfig, HeartRateSnapshot, HeartRateTracker},
    error::{AcquisitionError, HeartlineError, Result},
    ipc::events::{Event, HealthEvent, HealthStatus},
    source::{
        timeout::{spawn_reader, ReaderTask},
        AcquisitionConfig, SampleSource, TimedSource,
    },
};

use clock::{Clock, MonotonicClock};
use sampler::{DiagnosticsSnapshot, Sampler, SamplerContext, SamplerDiagnostics};

/// Broadcast channel capacity: 256 events buffered for slow subscribers.
const BROADCAST_CAP: usize = 256;

/// Longest waveform window a config may ask for.
pub const MAX_WAVEFORM_SECONDS: f32 = 600.0;

/// Configuration for one `Pipeline::start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct PipelineConfig {
    pub acquisition: AcquisitionConfig,
    pub detector: DetectorConfig,
    /// Seconds of raw waveform kept for display. Default: 10.
    pub waveform_seconds: f32,
    /// Maximum retained events; the oldest are dropped first.
    pub event_capacity: usize,
    /// Per-read deadline. `None` trusts the source to return promptly.
    /// Default: 100 ms.
    pub read_timeout_ms: Option<u64>,
    /// Consecutive failed reads before health turns `Paused`. Default: 3.
    pub failure_threshold: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            acquisition: AcquisitionConfig::default(),
            detector: DetectorConfig::default(),
            waveform_seconds: 10.0,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            read_timeout_ms: Some(100),
            failure_threshold: 3,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        self.acquisition.validate()?;
        self.detector.validate()?;

        if !(self.waveform_seconds > 0.0 && self.waveform_seconds <= MAX_WAVEFORM_SECONDS) {
            return Err(HeartlineError::Configuration(format!(
                "waveform window {} s must be in (0, {MAX_WAVEFORM_SECONDS}]",
                self.waveform_seconds
            )));
        }
        if self.event_capacity == 0 {
            return Err(HeartlineError::Configuration(
                "event capacity must be at least 1".into(),
            ));
        }
        if self.read_timeout_ms == Some(0) {
            return Err(HeartlineError::Configuration(
                "read timeout must be longer than 0 ms".into(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(HeartlineError::Configuration(
                "failure threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Samples needed to hold `waveform_seconds` at the configured rate.
    pub fn waveform_capacity(&self) -> usize {
        let samples = f64::from(self.waveform_seconds) * f64::from(self.acquisition.sample_rate_hz);
        (samples.ceil() as usize).max(1)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}

/// The source as the sampler thread sees it: bare, or behind a read deadline.
enum AttachedSource {
    Direct(Box<dyn SampleSource>),
    Timed(TimedSource),
}

impl AttachedSource {
    /// On failure the source comes back unchanged alongside the error.
    fn with_timeout(
        self,
        timeout: Option<Duration>,
    ) -> std::result::Result<Self, (Self, HeartlineError)> {
        self.with_timeout_on(timeout, spawn_reader)
    }

    fn with_timeout_on<F>(
        self,
        timeout: Option<Duration>,
        spawner: F,
    ) -> std::result::Result<Self, (Self, HeartlineError)>
    where
        F: FnOnce(ReaderTask) -> std::io::Result<JoinHandle<()>>,
    {
        match (self, timeout) {
            (AttachedSource::Direct(inner), Some(t)) => {
                match TimedSource::try_spawn_on(inner, t, spawner) {
                    Ok(timed) => Ok(AttachedSource::Timed(timed)),
                    Err((inner, e)) => Err((AttachedSource::Direct(inner), e)),
                }
            }
            (AttachedSource::Timed(mut timed), Some(t)) => {
                timed.set_timeout(t);
                Ok(AttachedSource::Timed(timed))
            }
            (AttachedSource::Timed(timed), None) => {
                // The reader thread owns the device now; keep the last deadline.
                debug!(
                    timeout_ms = timed.timeout().as_millis() as u64,
                    "source already behind a read deadline, keeping it"
                );
                Ok(AttachedSource::Timed(timed))
            }
            (direct, None) => Ok(direct),
        }
    }
}

impl SampleSource for AttachedSource {
    fn configure(&mut self, config: &AcquisitionConfig) -> Result<()> {
        match self {
            AttachedSource::Direct(s) => s.configure(config),
            AttachedSource::Timed(s) => s.configure(config),
        }
    }

    fn read(&mut self) -> std::result::Result<f32, AcquisitionError> {
        match self {
            AttachedSource::Direct(s) => s.read(),
            AttachedSource::Timed(s) => s.read(),
        }
    }
}

#[derive(Default)]
struct Lifecycle {
    /// Present while stopped.
    source: Option<AttachedSource>,
    /// Present while running; yields the source back on join.
    worker: Option<JoinHandle<Option<AttachedSource>>>,
}

/// One acquisition-and-detection pipeline bound to one sample source.
pub struct Pipeline {
    clock: Arc<dyn Clock>,
    config: RwLock<PipelineConfig>,
    lifecycle: Mutex<Lifecycle>,
    /// Replaced on every start so capacity follows the configured rate.
    waveform: RwLock<Arc<WaveformBuffer>>,
    events: RwLock<Arc<EventLog>>,
    heart_rate: Arc<Mutex<HeartRateTracker>>,
    /// `true` while the sampler thread should keep ticking.
    running: Arc<AtomicBool>,
    reset_epoch: Arc<AtomicU64>,
    health: Arc<Mutex<HealthStatus>>,
    event_tx: broadcast::Sender<Event>,
    health_tx: broadcast::Sender<HealthEvent>,
    diagnostics: Arc<SamplerDiagnostics>,
}

impl Pipeline {
    /// Create a stopped pipeline driven by the wall clock.
    pub fn new<S: SampleSource>(source: S) -> Self {
        Self::with_clock(source, Arc::new(MonotonicClock::new()))
    }

    /// Create a stopped pipeline driven by `clock`.
    pub fn with_clock<S: SampleSource>(source: S, clock: Arc<dyn Clock>) -> Self {
        let (event_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (health_tx, _) = broadcast::channel(BROADCAST_CAP);
        let config = PipelineConfig::default();

        Self {
            clock,
            waveform: RwLock::new(Arc::new(WaveformBuffer::new(config.waveform_capacity()))),
            events: RwLock::new(Arc::new(EventLog::new(config.event_capacity))),
            config: RwLock::new(config),
            lifecycle: Mutex::new(Lifecycle {
                source: Some(AttachedSource::Direct(Box::new(source))),
                worker: None,
            }),
            heart_rate: Arc::new(Mutex::new(HeartRateTracker::new())),
            running: Arc::new(AtomicBool::new(false)),
            reset_epoch: Arc::new(AtomicU64::new(0)),
            health: Arc::new(Mutex::new(HealthStatus::Stopped)),
            event_tx,
            health_tx,
            diagnostics: Arc::new(SamplerDiagnostics::default()),
        }
    }

    /// Configure the source and start sampling with the default adaptive detector.
    ///
    /// # Errors
    /// - `HeartlineError::AlreadyRunning` if already started.
    /// - `HeartlineError::Configuration` if `config` or the device rejects it.
    pub fn start(&self, config: PipelineConfig) -> Result<()> {
        let detector = AdaptiveDetector::new(config.detector.clone());
        self.start_with_detector(config, Box::new(detector))
    }

    /// Start sampling with a caller-supplied detector.
    pub fn start_with_detector(
        &self,
        config: PipelineConfig,
        detector: Box<dyn BeatDetector>,
    ) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.worker.is_some() {
            return Err(HeartlineError::AlreadyRunning);
        }
        config.validate()?;

        let source = lifecycle.source.take().ok_or_else(|| {
            HeartlineError::Other(anyhow::anyhow!("sample source lost by an earlier failed start"))
        })?;
        let mut source = match source.with_timeout(config.read_timeout()) {
            Ok(source) => source,
            Err((source, e)) => {
                warn!(error = %e, "could not start the ADC reader thread");
                lifecycle.source = Some(source);
                return Err(e);
            }
        };
        if let Err(e) = source.configure(&config.acquisition) {
            warn!(error = %e, "sample source rejected configuration");
            lifecycle.source = Some(source);
            return Err(e);
        }

        let waveform = Arc::new(WaveformBuffer::new(config.waveform_capacity()));
        let events = Arc::new(EventLog::new(config.event_capacity));
        *self.waveform.write() = Arc::clone(&waveform);
        *self.events.write() = Arc::clone(&events);
        self.heart_rate.lock().reset();
        self.diagnostics.reset();
        *self.config.write() = config.clone();

        self.running.store(true, Ordering::SeqCst);
        self.set_health(HealthStatus::Running, None);

        let ctx = SamplerContext {
            period: config.acquisition.period(),
            failure_threshold: config.failure_threshold,
            source,
            detector,
            clock: Arc::clone(&self.clock),
            waveform,
            events,
            heart_rate: Arc::clone(&self.heart_rate),
            running: Arc::clone(&self.running),
            reset_epoch: Arc::clone(&self.reset_epoch),
            health: Arc::clone(&self.health),
            event_tx: self.event_tx.clone(),
            health_tx: self.health_tx.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
        };

        // The context follows over a channel so a failed spawn leaves the source with us.
        let (ctx_tx, ctx_rx) = crossbeam_channel::bounded::<SamplerContext<AttachedSource>>(1);
        let spawned = thread::Builder::new()
            .name("heartline-sampler".into())
            .spawn(move || ctx_rx.recv().ok().map(|ctx| Sampler::new(ctx).run()));

        match spawned {
            Ok(handle) => {
                if let Err(crossbeam_channel::SendError(ctx)) = ctx_tx.send(ctx) {
                    self.abort_start(&mut lifecycle, ctx.source, "sampler thread exited early");
                    return Err(HeartlineError::WorkerPanicked);
                }
                lifecycle.worker = Some(handle);
                info!(
                    rate_hz = config.acquisition.sample_rate_hz,
                    gain = ?config.acquisition.gain,
                    channel = config.acquisition.channel,
                    "pipeline started"
                );
                Ok(())
            }
            Err(e) => {
                self.abort_start(&mut lifecycle, ctx.source, &e.to_string());
                Err(HeartlineError::Io(e))
            }
        }
    }

    fn abort_start(&self, lifecycle: &mut Lifecycle, source: AttachedSource, reason: &str) {
        warn!(reason, "could not start the sampler thread");
        lifecycle.source = Some(source);
        self.running.store(false, Ordering::SeqCst);
        self.set_health(HealthStatus::Stopped, Some(reason.to_string()));
    }

    /// Stop sampling and wait for the sampler thread to exit.
    ///
    /// Returns after at most one period plus any read already in flight.
    ///
    /// # Errors
    /// - `HeartlineError::NotRunning` if not currently running.
    /// - `HeartlineError::WorkerPanicked` if the sampler thread panicked; the
    ///   source is lost in that case.
    pub fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        let worker = lifecycle.worker.take().ok_or(HeartlineError::NotRunning)?;

        info!("pipeline stop requested");
        self.running.store(false, Ordering::SeqCst);
        let joined = worker.join();
        self.set_health(HealthStatus::Stopped, None);

        match joined {
            Ok(Some(source)) => {
                lifecycle.source = Some(source);
                info!("pipeline stopped");
                Ok(())
            }
            Ok(None) | Err(_) => Err(HeartlineError::WorkerPanicked),
        }
    }

    /// Clear all history and return the detector to warm-up.
    ///
    /// Buffers are emptied immediately; the detector itself is reset by the
    /// sampler at the start of its next tick.
    pub fn reset(&self) {
        self.waveform.read().clear();
        self.events.read().clear();
        self.heart_rate.lock().reset();
        self.reset_epoch.fetch_add(1, Ordering::AcqRel);
        info!("pipeline reset");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Configuration of the current (or most recent) run.
    pub fn config(&self) -> PipelineConfig {
        self.config.read().clone()
    }

    /// Time on the pipeline's clock, in the same frame as sample timestamps.
    pub fn now(&self) -> Timestamp {
        Timestamp::from_duration(self.clock.now())
    }

    /// Oldest-first copy of the raw waveform window.
    pub fn current_waveform(&self) -> Vec<Sample> {
        self.waveform.read().snapshot()
    }

    /// Waveform window passed through a trailing moving average of `window` samples.
    pub fn smoothed_waveform(&self, window: usize) -> Vec<Sample> {
        smoothed(&self.current_waveform(), window)
    }

    /// Events within `window` of the newest sample (or of `now()` before any sample).
    pub fn recent_events(&self, window: Duration) -> Vec<Event> {
        let anchor = self.waveform.read().latest().unwrap_or_else(|| self.now());
        self.query(anchor.saturating_sub_duration(window), anchor)
    }

    /// Events with `from <= timestamp <= to`, in chronological order.
    pub fn query(&self, from: Timestamp, to: Timestamp) -> Vec<Event> {
        self.events.read().query(from, to)
    }

    pub fn all_events(&self) -> Vec<Event> {
        self.events.read().all()
    }

    pub fn event_counts(&self) -> EventCounts {
        self.events.read().counts()
    }

    pub fn health(&self) -> HealthStatus {
        *self.health.lock()
    }

    pub fn heart_rate(&self) -> HeartRateSnapshot {
        self.heart_rate.lock().snapshot()
    }

    /// Snapshot of sampler counters for observability.
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    pub fn subscribe_health(&self) -> broadcast::Receiver<HealthEvent> {
        self.health_tx.subscribe()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn set_health(&self, status: HealthStatus, detail: Option<String>) {
        *self.health.lock() = status;
        let _ = self.health_tx.send(HealthEvent { status, detail });
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.lifecycle.get_mut().worker.is_some() {
            if let Err(e) = self.stop() {
                warn!(error = %e, "pipeline did not stop cleanly on drop");
            }
        }
    }
}
