//! Detected events and pipeline health.
//!
//! ## Delivery
//!
//! | Type | Pull accessor | Push channel |
//! |------|---------------|--------------|
//! | `Event` | `Pipeline::query` / `recent_events` | `Pipeline::subscribe_events` |
//! | `HealthStatus` | `Pipeline::health` | `Pipeline::subscribe_health` (`HealthEvent`) |

use serde::{Deserialize, Serialize};

use crate::buffering::Timestamp;

// ---------------------------------------------------------------------------
// Detector events
// ---------------------------------------------------------------------------

/// A discrete detection produced by the beat detector. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Time of the local maximum, not of the threshold crossing.
    pub timestamp: Timestamp,
    /// Raw amplitude (ADC counts) at the peak.
    pub amplitude_at_peak: f32,
    pub kind: EventKind,
}

impl Event {
    pub fn is_beat(&self) -> bool {
        self.kind == EventKind::Beat
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A plausible QRS deflection.
    Beat,
    /// A crossing that looked like noise: inside the refractory window or
    /// implausibly far from the baseline.
    #[serde(rename = "artifact")]
    ArtifactSuspected,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// Why the stream is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PauseReason {
    /// Too many consecutive acquisition failures. Clears on the next good read.
    SourceUnavailable,
}

/// Externally visible pipeline health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HealthStatus {
    /// Sampling and detecting.
    Running,
    /// Sampler alive but not producing samples.
    Paused(PauseReason),
    /// Not started, or stopped.
    Stopped,
}

impl HealthStatus {
    pub fn is_running(self) -> bool {
        self == HealthStatus::Running
    }

    pub fn is_paused(self) -> bool {
        matches!(self, HealthStatus::Paused(_))
    }
}

/// Emitted on every health transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthEvent {
    pub status: HealthStatus,
    /// Optional human-readable detail (e.g. the last acquisition error).
    pub detail: Option<String>,
}
