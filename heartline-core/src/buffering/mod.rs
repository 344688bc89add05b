//! Bounded in-memory history shared between the sampler and consumers.
//!
//! Both stores use copy-on-read under a short `parking_lot::RwLock` critical
//! section: the sampler thread is the only writer, readers always receive an
//! owned, consistent copy and never observe a half-applied push.

pub mod event_log;
pub mod sample;
pub mod waveform;

pub use event_log::{EventCounts, EventLog};
pub use sample::{Sample, Timestamp};
pub use waveform::{smoothed, WaveformBuffer};

/// Default event log capacity: at 3 beats/s this is ~45 minutes of history.
pub const DEFAULT_EVENT_CAPACITY: usize = 8_192;
