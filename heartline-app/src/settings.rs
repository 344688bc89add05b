//! Persistent monitor settings (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};

use heartline_core::detect::{ArtifactPolicy, MAX_WARMUP_MS};
use heartline_core::source::{CHANNEL_COUNT, MAX_SAMPLE_RATE_HZ};
use heartline_core::{AcquisitionConfig, DetectorConfig, Gain, PipelineConfig, SyntheticConfig};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub sample_rate_hz: u32,
    pub gain: Gain,
    pub channel: u8,
    pub sensitivity: f32,
    pub alpha: f32,
    pub refractory_ms: u64,
    pub peak_window_ms: u64,
    pub warmup_ms: u64,
    pub artifact_policy: ArtifactPolicy,
    pub waveform_seconds: f32,
    pub read_timeout_ms: Option<u64>,
    pub failure_threshold: u32,
    /// Moving-average width used for the exported smoothed trace.
    pub smoothing_window: usize,
    pub status_interval_ms: u64,
    pub report_dir: Option<String>,
    pub synthetic: SyntheticConfig,
}

impl Default for AppSettings {
    fn default() -> Self {
        let detector = DetectorConfig::default();
        let pipeline = PipelineConfig::default();
        Self {
            sample_rate_hz: pipeline.acquisition.sample_rate_hz,
            gain: Gain::default(),
            channel: 0,
            sensitivity: detector.sensitivity,
            alpha: detector.alpha,
            refractory_ms: detector.refractory_ms,
            peak_window_ms: detector.peak_window_ms,
            warmup_ms: detector.warmup_ms,
            artifact_policy: ArtifactPolicy::Emit,
            waveform_seconds: pipeline.waveform_seconds,
            read_timeout_ms: pipeline.read_timeout_ms,
            failure_threshold: pipeline.failure_threshold,
            smoothing_window: 5,
            status_interval_ms: 1_000,
            report_dir: None,
            synthetic: SyntheticConfig::default(),
        }
    }
}

impl AppSettings {
    /// Clamp every field into a range the pipeline accepts.
    pub fn normalize(&mut self) {
        self.sample_rate_hz = self.sample_rate_hz.clamp(50, MAX_SAMPLE_RATE_HZ);
        self.channel = self.channel.min(CHANNEL_COUNT - 1);
        self.sensitivity = finite_or(self.sensitivity, 3.0).clamp(1.0, 10.0);
        self.alpha = finite_or(self.alpha, 0.02).clamp(0.001, 0.5);
        self.refractory_ms = self.refractory_ms.clamp(150, 2_000);
        self.peak_window_ms = self.peak_window_ms.clamp(10, self.refractory_ms - 1);
        self.warmup_ms = self.warmup_ms.clamp(200, MAX_WARMUP_MS);
        self.waveform_seconds = finite_or(self.waveform_seconds, 10.0).clamp(1.0, 120.0);
        self.read_timeout_ms = self.read_timeout_ms.map(|ms| ms.clamp(5, 5_000));
        self.failure_threshold = self.failure_threshold.clamp(1, 1_000);
        self.smoothing_window = self.smoothing_window.clamp(1, 100);
        self.status_interval_ms = self.status_interval_ms.clamp(100, 60_000);
        self.report_dir = self
            .report_dir
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.synthetic.bpm = finite_or(self.synthetic.bpm, 72.0).clamp(20.0, 240.0);
    }

    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            acquisition: AcquisitionConfig {
                sample_rate_hz: self.sample_rate_hz,
                gain: self.gain,
                channel: self.channel,
            },
            detector: DetectorConfig {
                alpha: self.alpha,
                sensitivity: self.sensitivity,
                refractory_ms: self.refractory_ms,
                peak_window_ms: self.peak_window_ms,
                warmup_ms: self.warmup_ms,
                artifact_policy: self.artifact_policy,
                ..DetectorConfig::default()
            },
            waveform_seconds: self.waveform_seconds,
            read_timeout_ms: self.read_timeout_ms,
            failure_threshold: self.failure_threshold,
            ..PipelineConfig::default()
        }
    }

    /// Read and normalize `path`; a missing or unreadable file yields defaults.
    pub fn load_or_default(path: &Path) -> Self {
        let mut settings = match fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str::<AppSettings>(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "settings file unreadable, using defaults");
                AppSettings::default()
            }),
            Err(_) => AppSettings::default(),
        };
        settings.normalize();
        settings
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, json)
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

pub fn default_settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

pub fn default_report_dir() -> PathBuf {
    data_dir().join("sessions")
}

fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Heartline")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("heartline")
    }
}
