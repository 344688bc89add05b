use thiserror::Error;

/// A single failed conversion. Transient: the sampler skips the tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    #[error("ADC read timed out")]
    Timeout,

    #[error("ADC not responding")]
    NotResponding,

    #[error("ADC reading out of range: {0}")]
    OutOfRange(i32),

    #[error("bus error: {0}")]
    Bus(String),

    #[error("source disconnected")]
    Disconnected,
}

/// All errors produced by heartline-core.
#[derive(Debug, Error)]
pub enum HeartlineError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("sample source unavailable after {consecutive} consecutive failures")]
    SourceUnavailable { consecutive: u32 },

    #[error("pipeline is already running")]
    AlreadyRunning,

    #[error("pipeline is not running")]
    NotRunning,

    #[error("sampler thread panicked")]
    WorkerPanicked,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, HeartlineError>;
