//! Append-only, capacity-bounded log of detected events.

use std::collections::VecDeque;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::sample::Timestamp;
use crate::ipc::events::{Event, EventKind};

/// Chronological event history for the current session.
pub struct EventLog {
    events: RwLock<VecDeque<Event>>,
    capacity: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCounts {
    pub beats: usize,
    pub artifacts: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: RwLock::new(VecDeque::with_capacity(capacity.min(1 << 16))),
            capacity,
        }
    }

    /// Append an event, dropping the oldest at capacity.
    ///
    /// Returns `false` if the event is older than the newest logged event.
    pub fn append(&self, event: Event) -> bool {
        let mut events = self.events.write();
        if events
            .back()
            .is_some_and(|last| event.timestamp < last.timestamp)
        {
            debug!(
                timestamp = event.timestamp.as_micros(),
                "dropping out-of-order event"
            );
            return false;
        }
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
        true
    }

    /// All events with `from <= timestamp <= to`, oldest first.
    pub fn query(&self, from: Timestamp, to: Timestamp) -> Vec<Event> {
        if from > to {
            return Vec::new();
        }
        let events = self.events.read();
        let start = events.partition_point(|e| e.timestamp < from);
        let end = events.partition_point(|e| e.timestamp <= to);
        events.range(start..end).copied().collect()
    }

    pub fn all(&self) -> Vec<Event> {
        self.events.read().iter().copied().collect()
    }

    pub fn counts(&self) -> EventCounts {
        let events = self.events.read();
        let beats = events.iter().filter(|e| e.kind == EventKind::Beat).count();
        EventCounts {
            beats,
            artifacts: events.len() - beats,
        }
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}
