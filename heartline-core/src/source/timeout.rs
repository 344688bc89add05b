//! Read-timeout enforcement for blocking sources.
//!
//! The wrapped source runs on its own reader thread. Each `read` sends a
//! sequence-tagged request and waits with `recv_timeout`; a reply that arrives
//! after its deadline is discarded instead of being handed to a later tick.
//! While a timed-out read is still stuck in the device, further reads fail
//! fast with `Timeout` so requests never pile up behind it.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{
    bounded, unbounded, Receiver, RecvTimeoutError, SendError, Sender, TryRecvError,
};
use tracing::{debug, warn};

use crate::error::{AcquisitionError, HeartlineError, Result};
use crate::source::{AcquisitionConfig, SampleSource};

/// Body of the reader thread, handed to whatever starts it.
pub(crate) type ReaderTask = Box<dyn FnOnce() + Send + 'static>;

pub(crate) fn spawn_reader(task: ReaderTask) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new().name("heartline-adc".into()).spawn(task)
}

enum Request {
    Configure(AcquisitionConfig),
    Read(u64),
}

enum Response {
    Configured(Result<()>),
    Read(u64, std::result::Result<f32, AcquisitionError>),
}

pub struct TimedSource {
    requests: Option<Sender<Request>>,
    responses: Receiver<Response>,
    timeout: Duration,
    next_seq: u64,
    /// Sequence number of a read that timed out and has not answered yet.
    stalled: Option<u64>,
    _worker: JoinHandle<()>,
}

impl TimedSource {
    /// Move `inner` onto a dedicated reader thread.
    pub fn spawn<S: SampleSource>(inner: S, timeout: Duration) -> Result<Self> {
        Self::try_spawn(inner, timeout).map_err(|(_, e)| e)
    }

    /// Like `spawn`, but hands `inner` back if the reader thread cannot start.
    pub fn try_spawn<S: SampleSource>(
        inner: S,
        timeout: Duration,
    ) -> std::result::Result<Self, (S, HeartlineError)> {
        Self::try_spawn_on(inner, timeout, spawn_reader)
    }

    pub(crate) fn try_spawn_on<S, F>(
        inner: S,
        timeout: Duration,
        spawner: F,
    ) -> std::result::Result<Self, (S, HeartlineError)>
    where
        S: SampleSource,
        F: FnOnce(ReaderTask) -> std::io::Result<JoinHandle<()>>,
    {
        let (req_tx, req_rx) = unbounded::<Request>();
        let (resp_tx, resp_rx) = bounded::<Response>(4);
        // The source follows over a channel so a failed spawn leaves it with us.
        let (source_tx, source_rx) = bounded::<S>(1);

        let spawned = spawner(Box::new(move || {
            let Ok(mut inner) = source_rx.recv() else {
                return;
            };
            for request in req_rx {
                let response = match request {
                    Request::Configure(cfg) => Response::Configured(inner.configure(&cfg)),
                    Request::Read(seq) => Response::Read(seq, inner.read()),
                };
                if resp_tx.send(response).is_err() {
                    break;
                }
            }
            debug!("ADC reader thread exiting");
        }));

        let worker = match spawned {
            Ok(handle) => handle,
            Err(e) => return Err((inner, HeartlineError::Io(e))),
        };
        if let Err(SendError(inner)) = source_tx.send(inner) {
            return Err((
                inner,
                HeartlineError::Acquisition(AcquisitionError::Disconnected),
            ));
        }

        Ok(Self {
            requests: Some(req_tx),
            responses: resp_rx,
            timeout,
            next_seq: 0,
            stalled: None,
            _worker: worker,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Applies from the next `read`.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn send(&self, request: Request) -> std::result::Result<(), AcquisitionError> {
        self.requests
            .as_ref()
            .ok_or(AcquisitionError::Disconnected)?
            .send(request)
            .map_err(|_| AcquisitionError::Disconnected)
    }

    /// Drop a read reply nobody is waiting for; clears the stall if it was that read's.
    fn discard_read_reply(&mut self, seq: u64) {
        debug!(seq, "discarding late ADC reply");
        if self.stalled == Some(seq) {
            self.stalled = None;
        }
    }

    /// Consume the late reply of a stalled read, if it has arrived.
    fn drain_stalled(&mut self) -> std::result::Result<(), AcquisitionError> {
        while self.stalled.is_some() {
            match self.responses.try_recv() {
                Ok(Response::Read(seq, _)) => self.discard_read_reply(seq),
                Ok(Response::Configured(_)) => continue,
                Err(TryRecvError::Empty) => return Err(AcquisitionError::Timeout),
                Err(TryRecvError::Disconnected) => return Err(AcquisitionError::Disconnected),
            }
        }
        Ok(())
    }
}

impl SampleSource for TimedSource {
    /// Waits for the reader thread without a deadline: configuration happens
    /// before the tick loop, where blocking is acceptable.
    fn configure(&mut self, config: &AcquisitionConfig) -> Result<()> {
        self.send(Request::Configure(*config))?;
        loop {
            match self.responses.recv() {
                Ok(Response::Configured(result)) => return result,
                Ok(Response::Read(seq, _)) => self.discard_read_reply(seq),
                Err(_) => return Err(HeartlineError::Acquisition(AcquisitionError::Disconnected)),
            }
        }
    }

    fn read(&mut self) -> std::result::Result<f32, AcquisitionError> {
        self.drain_stalled()?;

        let seq = self.next_seq;
        self.next_seq += 1;
        self.send(Request::Read(seq))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.responses.recv_timeout(remaining) {
                Ok(Response::Read(got, result)) if got == seq => return result,
                Ok(Response::Read(got, _)) => self.discard_read_reply(got),
                Ok(Response::Configured(_)) => continue,
                Err(RecvTimeoutError::Timeout) => {
                    warn!(seq, timeout_ms = self.timeout.as_millis() as u64, "ADC read timed out");
                    self.stalled = Some(seq);
                    return Err(AcquisitionError::Timeout);
                }
                Err(RecvTimeoutError::Disconnected) => return Err(AcquisitionError::Disconnected),
            }
        }
    }
}

impl Drop for TimedSource {
    fn drop(&mut self) {
        // Closing the request channel lets the reader thread finish its current
        // read and exit. It is not joined: that read may be stuck on the bus.
        self.requests.take();
    }
}
