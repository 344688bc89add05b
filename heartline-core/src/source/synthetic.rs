//! `SyntheticEcg` — software stand-in for the ADC.
//!
//! Produces a flat baseline with narrow triangular R-wave-like pulses at a fixed
//! heart rate plus uniform noise. Time advances one sample period per `read`,
//! so the output is identical no matter how fast the sampler actually runs.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AcquisitionError, Result};
use crate::source::{AcquisitionConfig, Gain, SampleSource};

const ADC_MIN: f32 = -32_768.0;
const ADC_MAX: f32 = 32_767.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct SyntheticConfig {
    pub bpm: f32,
    /// Pulse height above baseline at `Gain::One`, in counts.
    pub pulse_amplitude: f32,
    pub pulse_width_ms: f32,
    pub baseline: f32,
    /// Peak uniform noise, in counts.
    pub noise: f32,
    pub first_beat_ms: f32,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            bpm: 72.0,
            pulse_amplitude: 8_000.0,
            pulse_width_ms: 40.0,
            baseline: 0.0,
            noise: 150.0,
            first_beat_ms: 1_200.0,
            seed: 0x5eed,
        }
    }
}

pub struct SyntheticEcg {
    config: SyntheticConfig,
    rng: StdRng,
    sample_rate_hz: u32,
    gain: Gain,
    index: u64,
}

impl SyntheticEcg {
    pub fn new(config: SyntheticConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            sample_rate_hz: AcquisitionConfig::default().sample_rate_hz,
            gain: Gain::default(),
            index: 0,
        }
    }

    /// Noise-free value at `t_ms` since the first read, before gain.
    fn pulse_at(&self, t_ms: f32) -> f32 {
        let cfg = &self.config;
        if t_ms < cfg.first_beat_ms || cfg.bpm <= 0.0 || cfg.pulse_width_ms <= 0.0 {
            return 0.0;
        }
        let interval_ms = 60_000.0 / cfg.bpm;
        let phase = (t_ms - cfg.first_beat_ms) % interval_ms;
        if phase >= cfg.pulse_width_ms {
            return 0.0;
        }
        let half = cfg.pulse_width_ms / 2.0;
        cfg.pulse_amplitude * (1.0 - (phase - half).abs() / half)
    }
}

impl Default for SyntheticEcg {
    fn default() -> Self {
        Self::new(SyntheticConfig::default())
    }
}

impl SampleSource for SyntheticEcg {
    fn configure(&mut self, config: &AcquisitionConfig) -> Result<()> {
        config.validate()?;
        self.sample_rate_hz = config.sample_rate_hz;
        self.gain = config.gain;
        self.index = 0;
        self.rng = StdRng::seed_from_u64(self.config.seed);
        debug!(
            rate_hz = config.sample_rate_hz,
            channel = config.channel,
            "synthetic source configured"
        );
        Ok(())
    }

    fn read(&mut self) -> std::result::Result<f32, AcquisitionError> {
        let t_ms = self.index as f32 * 1_000.0 / self.sample_rate_hz as f32;
        self.index += 1;

        let noise = if self.config.noise > 0.0 {
            self.rng.gen_range(-self.config.noise..=self.config.noise)
        } else {
            0.0
        };
        let value = (self.config.baseline + self.pulse_at(t_ms) + noise) * self.gain.factor();
        Ok(value.clamp(ADC_MIN, ADC_MAX))
    }
}
