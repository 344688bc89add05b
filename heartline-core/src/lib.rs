//! # heartline-core
//!
//! Single-lead ECG acquisition and beat detection.
//!
//! ## Architecture
//!
//! ```text
//! SampleSource (ADC) → Sampler (fixed-rate thread) → WaveformBuffer (ring)
//!                             │
//!                       BeatDetector::consume
//!                             │
//!                  EventLog + HeartRateTracker
//!                             │
//!                  broadcast::Sender<Event / HealthEvent>
//! ```
//!
//! One sampler thread writes; any number of consumers read owned snapshots
//! through `Pipeline`.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod buffering;
pub mod detect;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod report;
pub mod source;

// Convenience re-exports for downstream crates
pub use buffering::{Sample, Timestamp};
pub use detect::{AdaptiveDetector, BeatDetector, DetectorConfig, HeartRateSnapshot};
pub use engine::{Pipeline, PipelineConfig};
pub use error::{AcquisitionError, HeartlineError};
pub use ipc::events::{Event, EventKind, HealthEvent, HealthStatus, PauseReason};
pub use report::SessionReport;
pub use source::{AcquisitionConfig, Gain, SampleSource, SyntheticConfig, SyntheticEcg};
