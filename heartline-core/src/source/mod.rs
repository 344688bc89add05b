//! ADC boundary.
//!
//! The `SampleSource` trait is the seam between the pipeline and the physical
//! converter. The bus driver itself lives outside this crate; anything that can
//! produce one reading per call (hardware driver, `SyntheticEcg`, test scripts)
//! plugs in here without touching the sampler.

pub mod scripted;
pub mod synthetic;
pub mod timeout;

pub use scripted::ScriptedSource;
pub use synthetic::{SyntheticConfig, SyntheticEcg};
pub use timeout::TimedSource;

use serde::{Deserialize, Serialize};

use crate::error::{AcquisitionError, HeartlineError, Result};

/// Highest data rate the supported converter family can deliver (samples/s).
pub const MAX_SAMPLE_RATE_HZ: u32 = 860;

/// Number of single-ended input channels.
pub const CHANNEL_COUNT: u8 = 4;

/// Programmable-gain amplifier setting, named by its gain factor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Gain {
    /// ±6.144 V
    TwoThirds,
    /// ±4.096 V
    #[default]
    One,
    /// ±2.048 V
    Two,
    /// ±1.024 V
    Four,
    /// ±0.512 V
    Eight,
    /// ±0.256 V
    Sixteen,
}

impl Gain {
    /// Full-scale input range in volts (symmetric around zero).
    pub fn full_scale_volts(self) -> f32 {
        match self {
            Gain::TwoThirds => 6.144,
            Gain::One => 4.096,
            Gain::Two => 2.048,
            Gain::Four => 1.024,
            Gain::Eight => 0.512,
            Gain::Sixteen => 0.256,
        }
    }

    /// Amplification relative to `Gain::One`.
    pub fn factor(self) -> f32 {
        Gain::One.full_scale_volts() / self.full_scale_volts()
    }

    /// Convert a signed 16-bit reading into volts at this gain.
    pub fn counts_to_volts(self, counts: f32) -> f32 {
        counts * self.full_scale_volts() / 32_768.0
    }
}

/// Acquisition parameters fixed for the lifetime of one `start()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Target ticks per second.
    pub sample_rate_hz: u32,
    pub gain: Gain,
    /// Physical input, `0..CHANNEL_COUNT`.
    pub channel: u8,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 250,
            gain: Gain::default(),
            channel: 0,
        }
    }
}

impl AcquisitionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate_hz == 0 || self.sample_rate_hz > MAX_SAMPLE_RATE_HZ {
            return Err(HeartlineError::Configuration(format!(
                "sample rate {} Hz outside 1..={MAX_SAMPLE_RATE_HZ}",
                self.sample_rate_hz
            )));
        }
        if self.channel >= CHANNEL_COUNT {
            return Err(HeartlineError::Configuration(format!(
                "channel {} outside 0..{CHANNEL_COUNT}",
                self.channel
            )));
        }
        Ok(())
    }

    /// Nominal tick period.
    pub fn period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / f64::from(self.sample_rate_hz.max(1)))
    }
}

/// Contract for ADC backends.
///
/// The pipeline guarantees calls never overlap: `configure` once per start,
/// then `read` from a single thread.
pub trait SampleSource: Send + 'static {
    /// Apply channel / gain / rate before the tick loop starts.
    ///
    /// # Errors
    /// `HeartlineError::Configuration` if the device cannot honour `config`.
    fn configure(&mut self, config: &AcquisitionConfig) -> Result<()> {
        let _ = config;
        Ok(())
    }

    /// Block until one conversion completes and return it in ADC counts.
    fn read(&mut self) -> std::result::Result<f32, AcquisitionError>;
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn configure(&mut self, config: &AcquisitionConfig) -> Result<()> {
        (**self).configure(config)
    }

    fn read(&mut self) -> std::result::Result<f32, AcquisitionError> {
        (**self).read()
    }
}
