//! Session export: CSV tables and a JSON summary.

use std::io::Write;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffering::Sample;
use crate::detect::HeartRateSnapshot;
use crate::error::Result;
use crate::ipc::events::{Event, EventKind};

/// `timestamp_ms,amplitude`, one row per sample.
pub fn write_waveform_csv<W: Write>(mut out: W, samples: &[Sample]) -> Result<()> {
    writeln!(out, "timestamp_ms,amplitude")?;
    for s in samples {
        writeln!(out, "{:.3},{}", s.timestamp.as_millis_f64(), s.amplitude)?;
    }
    out.flush()?;
    Ok(())
}

/// `timestamp_ms,kind,amplitude`, one row per event.
pub fn write_events_csv<W: Write>(mut out: W, events: &[Event]) -> Result<()> {
    writeln!(out, "timestamp_ms,kind,amplitude")?;
    for e in events {
        writeln!(
            out,
            "{:.3},{},{}",
            e.timestamp.as_millis_f64(),
            kind_label(e.kind),
            e.amplitude_at_peak
        )?;
    }
    out.flush()?;
    Ok(())
}

/// `timestamp_ms,bpm` from the tracker's BPM history.
pub fn write_bpm_csv<W: Write>(mut out: W, rate: &HeartRateSnapshot) -> Result<()> {
    writeln!(out, "timestamp_ms,bpm")?;
    for p in &rate.history {
        writeln!(out, "{:.3},{:.2}", p.timestamp.as_millis_f64(), p.bpm)?;
    }
    out.flush()?;
    Ok(())
}

fn kind_label(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Beat => "beat",
        EventKind::ArtifactSuspected => "artifact",
    }
}

/// Summary of one recording session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub duration_secs: f64,
    pub beats: usize,
    pub artifacts: usize,
    /// Share of all events flagged as artifacts, 0–100.
    pub artifact_percent: f32,
    pub mean_bpm: Option<f32>,
    pub min_bpm: Option<f32>,
    pub max_bpm: Option<f32>,
    pub mean_rr_ms: Option<f32>,
    /// Standard deviation of the retained R-R intervals.
    pub rr_std_dev_ms: Option<f32>,
}

impl SessionReport {
    pub fn build(events: &[Event], rate: &HeartRateSnapshot, duration: Duration) -> Self {
        let beats = events.iter().filter(|e| e.is_beat()).count();
        let artifacts = events.len() - beats;
        let artifact_percent = if events.is_empty() {
            0.0
        } else {
            artifacts as f32 * 100.0 / events.len() as f32
        };

        let bpm: Vec<f32> = rate.history.iter().map(|p| p.bpm).collect();
        let (mean_rr_ms, rr_std_dev_ms) = mean_and_std_dev(&rate.rr_intervals_ms).unzip();

        Self {
            duration_secs: duration.as_secs_f64(),
            beats,
            artifacts,
            artifact_percent,
            mean_bpm: mean_and_std_dev(&bpm).map(|(mean, _)| mean),
            min_bpm: bpm.iter().copied().reduce(f32::min),
            max_bpm: bpm.iter().copied().reduce(f32::max),
            mean_rr_ms,
            rr_std_dev_ms,
        }
    }

    pub fn write_json<W: Write>(&self, out: W) -> Result<()> {
        serde_json::to_writer_pretty(out, self).map_err(std::io::Error::from)?;
        Ok(())
    }
}

fn mean_and_std_dev(values: &[f32]) -> Option<(f32, f32)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    Some((mean, variance.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::Timestamp;
    use crate::detect::HeartRateTracker;
    use approx::assert_relative_eq;

    fn event(ms: u64, kind: EventKind) -> Event {
        Event {
            timestamp: Timestamp::from_millis(ms),
            amplitude_at_peak: 1_500.0,
            kind,
        }
    }

    fn session() -> (Vec<Event>, HeartRateSnapshot) {
        let events = vec![
            event(1_000, EventKind::Beat),
            event(1_100, EventKind::ArtifactSuspected),
            event(1_800, EventKind::Beat),
            event(2_800, EventKind::Beat),
            event(3_400, EventKind::Beat),
        ];
        let mut tracker = HeartRateTracker::new();
        for e in &events {
            tracker.observe(e);
        }
        (events, tracker.snapshot())
    }

    #[test]
    fn summary_counts_and_rates() {
        let (events, rate) = session();
        let report = SessionReport::build(&events, &rate, Duration::from_secs(4));

        assert_eq!(report.beats, 4);
        assert_eq!(report.artifacts, 1);
        assert_relative_eq!(report.artifact_percent, 20.0);
        // R-R: 800, 1000, 600 ms → 75, 60, 100 BPM.
        assert_relative_eq!(report.min_bpm.unwrap_or_default(), 60.0, epsilon = 1e-3);
        assert_relative_eq!(report.max_bpm.unwrap_or_default(), 100.0, epsilon = 1e-3);
        assert_relative_eq!(report.mean_bpm.unwrap_or_default(), 235.0 / 3.0, epsilon = 1e-3);
        assert_relative_eq!(report.mean_rr_ms.unwrap_or_default(), 800.0, epsilon = 1e-2);
        assert!(report.rr_std_dev_ms.unwrap_or_default() > 150.0);
    }

    #[test]
    fn empty_session_has_no_rates() {
        let report = SessionReport::build(&[], &HeartRateSnapshot::default(), Duration::ZERO);
        assert_eq!(report.beats, 0);
        assert_eq!(report.artifact_percent, 0.0);
        assert_eq!(report.mean_bpm, None);
        assert_eq!(report.min_bpm, None);
        assert_eq!(report.rr_std_dev_ms, None);
    }

    #[test]
    fn csv_tables_have_headers_and_rows() {
        let (events, rate) = session();

        let mut buf = Vec::new();
        write_events_csv(&mut buf, &events).expect("events csv");
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "timestamp_ms,kind,amplitude");
        assert_eq!(lines[1], "1000.000,beat,1500");
        assert_eq!(lines[2], "1100.000,artifact,1500");
        assert_eq!(lines.len(), 6);

        let mut buf = Vec::new();
        write_bpm_csv(&mut buf, &rate).expect("bpm csv");
        let text = String::from_utf8(buf).expect("utf8");
        assert_eq!(text.lines().nth(1), Some("1800.000,75.00"));

        let samples = vec![Sample::new(Timestamp(4_000), -12.5)];
        let mut buf = Vec::new();
        write_waveform_csv(&mut buf, &samples).expect("waveform csv");
        assert_eq!(
            String::from_utf8(buf).expect("utf8"),
            "timestamp_ms,amplitude\n4.000,-12.5\n"
        );
    }

    #[test]
    fn json_summary_uses_camel_case() {
        let (events, rate) = session();
        let report = SessionReport::build(&events, &rate, Duration::from_secs(4));
        let mut buf = Vec::new();
        report.write_json(&mut buf).expect("json");

        let value: serde_json::Value = serde_json::from_slice(&buf).expect("parse");
        assert_eq!(value["beats"], 4);
        assert!(value.get("artifactPercent").is_some());
        assert!(value.get("meanBpm").is_some());
    }
}
