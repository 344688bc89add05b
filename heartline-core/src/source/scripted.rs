//! `ScriptedSource` — replays a closure, for tests and offline replays.

use crate::error::AcquisitionError;
use crate::source::SampleSource;

type Script = Box<dyn FnMut(u64) -> Result<f32, AcquisitionError> + Send>;

/// A source whose `n`-th read returns `script(n)`.
pub struct ScriptedSource {
    script: Script,
    reads: u64,
}

impl ScriptedSource {
    pub fn new<F>(script: F) -> Self
    where
        F: FnMut(u64) -> Result<f32, AcquisitionError> + Send + 'static,
    {
        Self {
            script: Box::new(script),
            reads: 0,
        }
    }

    /// Replay a fixed trace, then hold the last value.
    pub fn from_trace(trace: Vec<f32>) -> Self {
        let last = trace.last().copied().unwrap_or(0.0);
        Self::new(move |n| {
            Ok(usize::try_from(n)
                .ok()
                .and_then(|i| trace.get(i).copied())
                .unwrap_or(last))
        })
    }

    /// Number of reads served so far.
    pub fn reads(&self) -> u64 {
        self.reads
    }
}

impl SampleSource for ScriptedSource {
    fn read(&mut self) -> Result<f32, AcquisitionError> {
        let n = self.reads;
        self.reads += 1;
        (self.script)(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_trace_then_holds() {
        let mut src = ScriptedSource::from_trace(vec![1.0, 2.0]);
        assert_eq!(src.read(), Ok(1.0));
        assert_eq!(src.read(), Ok(2.0));
        assert_eq!(src.read(), Ok(2.0));
        assert_eq!(src.reads(), 3);
    }

    #[test]
    fn script_sees_read_index() {
        let mut src = ScriptedSource::new(|n| {
            if n == 1 {
                Err(AcquisitionError::NotResponding)
            } else {
                Ok(n as f32)
            }
        });
        assert_eq!(src.read(), Ok(0.0));
        assert_eq!(src.read(), Err(AcquisitionError::NotResponding));
        assert_eq!(src.read(), Ok(2.0));
    }
}
