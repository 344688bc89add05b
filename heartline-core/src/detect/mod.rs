//! Beat detection abstraction.
//!
//! The `BeatDetector` trait is the extensibility point for the sampler: it
//! feeds one sample at a time and receives zero or one `Event` back. The
//! default implementation is `AdaptiveDetector`.

pub mod adaptive;
pub mod rate;

pub use adaptive::{AdaptiveDetector, ArtifactPolicy, DetectorConfig, MAX_WARMUP_MS};
pub use rate::{HeartRateSnapshot, HeartRateTracker};

use serde::{Deserialize, Serialize};

use crate::buffering::Sample;
use crate::ipc::events::Event;

/// Coarse detector state, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DetectorPhase {
    /// Calibrating baseline and variability; no events.
    Warmup,
    /// Waiting for an upward threshold crossing.
    Idle,
    /// Tracking the local maximum after a crossing.
    PeakSearch,
}

/// Streaming detector contract.
///
/// Implementations are driven by a single thread and need no internal
/// synchronisation. They must only look at past and current samples.
pub trait BeatDetector: Send + 'static {
    /// Feed one sample. Never fails: implausible input becomes an
    /// `ArtifactSuspected` event or is ignored.
    fn consume(&mut self, sample: &Sample) -> Option<Event>;

    /// Drop all state and re-enter warm-up.
    fn reset(&mut self);

    fn phase(&self) -> DetectorPhase;
}
