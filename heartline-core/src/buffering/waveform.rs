//! Overwrite-on-full waveform history.
//!
//! Backed by `ringbuf::HeapRb<Sample>` and `push_overwrite`, so a push at
//! capacity evicts exactly the oldest sample in O(1).

use parking_lot::RwLock;
use ringbuf::{
    traits::{Consumer, Observer, RingBuffer},
    HeapRb,
};
use tracing::debug;

use super::sample::{Sample, Timestamp};

struct Inner {
    ring: HeapRb<Sample>,
    newest: Option<Timestamp>,
}

/// Fixed-capacity circular store of the most recent samples.
pub struct WaveformBuffer {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl WaveformBuffer {
    /// A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: RwLock::new(Inner {
                ring: HeapRb::new(capacity),
                newest: None,
            }),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest one at capacity.
    ///
    /// Returns `false` (and stores nothing) if the sample is not strictly newer
    /// than the newest stored sample.
    pub fn push(&self, sample: Sample) -> bool {
        let mut inner = self.inner.write();
        if inner.newest.is_some_and(|newest| sample.timestamp <= newest) {
            debug!(
                timestamp = sample.timestamp.as_micros(),
                "dropping non-monotonic sample"
            );
            return false;
        }
        inner.ring.push_overwrite(sample);
        inner.newest = Some(sample.timestamp);
        true
    }

    /// Point-in-time copy, oldest → newest.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.inner.read().ring.iter().copied().collect()
    }

    /// The most recent `n` samples, oldest → newest.
    pub fn tail(&self, n: usize) -> Vec<Sample> {
        let inner = self.inner.read();
        let len = inner.ring.occupied_len();
        inner.ring.iter().skip(len.saturating_sub(n)).copied().collect()
    }

    pub fn latest(&self) -> Option<Timestamp> {
        self.inner.read().newest
    }

    pub fn len(&self) -> usize {
        self.inner.read().ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.ring = HeapRb::new(self.capacity);
        inner.newest = None;
    }
}

/// Trailing moving average over `window` samples, used for dashboard display.
///
/// The first `window - 1` outputs average over however many samples exist.
pub fn smoothed(samples: &[Sample], window: usize) -> Vec<Sample> {
    let window = window.max(1);
    let mut sum = 0f64;
    let mut out = Vec::with_capacity(samples.len());
    for (i, sample) in samples.iter().enumerate() {
        sum += f64::from(sample.amplitude);
        if i >= window {
            sum -= f64::from(samples[i - window].amplitude);
        }
        let n = (i + 1).min(window);
        out.push(Sample::new(sample.timestamp, (sum / n as f64) as f32));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ms: u64, amplitude: f32) -> Sample {
        Sample::new(Timestamp::from_millis(ms), amplitude)
    }

    fn fill(buf: &WaveformBuffer, count: u64) {
        for i in 0..count {
            buf.push(sample(i * 4, i as f32));
        }
    }

    #[test]
    fn len_never_exceeds_capacity() {
        let buf = WaveformBuffer::new(5);
        for i in 0..13 {
            buf.push(sample(i * 4, i as f32));
            assert!(buf.len() <= buf.capacity());
        }
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn overwriting_evicts_exactly_the_oldest() {
        let buf = WaveformBuffer::new(5);
        fill(&buf, 5);
        let before = buf.snapshot();

        buf.push(sample(20, 5.0));
        let after = buf.snapshot();

        assert_eq!(after.len(), 5);
        assert_eq!(&after[..4], &before[1..]);
        assert_eq!(after[4], sample(20, 5.0));
    }

    #[test]
    fn snapshot_is_sorted_without_duplicates() {
        let buf = WaveformBuffer::new(64);
        fill(&buf, 200);
        let snap = buf.snapshot();
        assert!(snap.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn snapshot_is_idempotent_without_push() {
        let buf = WaveformBuffer::new(16);
        fill(&buf, 40);
        assert_eq!(buf.snapshot(), buf.snapshot());
    }

    #[test]
    fn rejects_non_monotonic_timestamps() {
        let buf = WaveformBuffer::new(8);
        assert!(buf.push(sample(10, 1.0)));
        assert!(!buf.push(sample(10, 2.0)));
        assert!(!buf.push(sample(5, 3.0)));
        assert_eq!(buf.snapshot(), vec![sample(10, 1.0)]);
    }

    #[test]
    fn tail_and_clear() {
        let buf = WaveformBuffer::new(8);
        fill(&buf, 6);
        let tail = buf.tail(2);
        assert_eq!(tail, vec![sample(16, 4.0), sample(20, 5.0)]);
        assert_eq!(buf.latest(), Some(Timestamp::from_millis(20)));

        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.latest(), None);
        // Timestamps may restart after a clear.
        assert!(buf.push(sample(0, 1.0)));
    }

    #[test]
    fn concurrent_readers_never_see_torn_state() {
        use std::sync::Arc;
        use std::thread;

        let buf = Arc::new(WaveformBuffer::new(100));
        let writer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || fill(&buf, 20_000))
        };

        for _ in 0..200 {
            let snap = buf.snapshot();
            assert!(snap.len() <= 100);
            assert!(snap.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        }
        writer.join().expect("writer panicked");
        assert_eq!(buf.len(), 100);
    }

    #[test]
    fn smoothing_uses_trailing_window() {
        let samples: Vec<Sample> = (0..5).map(|i| sample(i * 4, (i * 3) as f32)).collect();
        let out = smoothed(&samples, 2);
        let values: Vec<f32> = out.iter().map(|s| s.amplitude).collect();
        assert_eq!(values, vec![0.0, 1.5, 4.5, 7.5, 10.5]);
        assert_eq!(out[3].timestamp, samples[3].timestamp);
    }
}
