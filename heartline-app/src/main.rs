//! Heartline headless monitor.
//!
//! Runs a pipeline against the synthetic ECG source, logs a status line at a
//! fixed interval and writes a session report when the run ends.

mod settings;

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use heartline_core::report::{write_bpm_csv, write_events_csv, write_waveform_csv};
use heartline_core::{Pipeline, SessionReport, SyntheticEcg};
use tracing::{info, warn};

use settings::{default_report_dir, default_settings_path, AppSettings};

const USAGE: &str = "\
usage: heartline [--settings PATH] [--duration-secs N] [--report-dir DIR] [--status-interval-ms N]

  --settings PATH          settings JSON (default: user data dir)
  --duration-secs N        stop after N seconds (default: 30)
  --report-dir DIR         where session folders are written
  --status-interval-ms N   status line period";

#[derive(Debug, Default, PartialEq)]
struct Args {
    settings: Option<PathBuf>,
    duration_secs: Option<u64>,
    report_dir: Option<PathBuf>,
    status_interval_ms: Option<u64>,
    help: bool,
}

fn parse_args<I>(args: I) -> Result<Args>
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = Args::default();
    let mut it = args.into_iter();
    while let Some(flag) = it.next() {
        let mut value = || it.next().with_context(|| format!("{flag} needs a value"));
        match flag.as_str() {
            "--settings" => parsed.settings = Some(PathBuf::from(value()?)),
            "--report-dir" => parsed.report_dir = Some(PathBuf::from(value()?)),
            "--duration-secs" => {
                parsed.duration_secs = Some(value()?.parse().context("--duration-secs")?)
            }
            "--status-interval-ms" => {
                parsed.status_interval_ms =
                    Some(value()?.parse().context("--status-interval-ms")?)
            }
            "-h" | "--help" => parsed.help = true,
            other => bail!("unknown argument `{other}`\n\n{USAGE}"),
        }
    }
    Ok(parsed)
}

fn main() -> Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("heartline=info")),
        )
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    if args.help {
        println!("{USAGE}");
        return Ok(());
    }

    // ── Settings ──────────────────────────────────────────────────────────
    let settings_path = args.settings.clone().unwrap_or_else(default_settings_path);
    let mut settings = AppSettings::load_or_default(&settings_path);
    if let Some(ms) = args.status_interval_ms {
        settings.status_interval_ms = ms;
        settings.normalize();
    }
    info!(path = %settings_path.display(), "settings loaded");

    let report_root = args
        .report_dir
        .clone()
        .or_else(|| settings.report_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(default_report_dir);
    let duration = Duration::from_secs(args.duration_secs.unwrap_or(30));

    // ── Run ───────────────────────────────────────────────────────────────
    let pipeline = Pipeline::new(SyntheticEcg::new(settings.synthetic.clone()));
    pipeline
        .start(settings.to_pipeline_config())
        .context("failed to start pipeline")?;
    info!(duration_secs = duration.as_secs(), "Heartline monitoring");

    let started = Instant::now();
    let interval = Duration::from_millis(settings.status_interval_ms);
    while started.elapsed() < duration {
        thread::sleep(interval.min(duration.saturating_sub(started.elapsed())));
        log_status(&pipeline);
    }

    pipeline.stop().context("failed to stop pipeline")?;

    // ── Report ────────────────────────────────────────────────────────────
    let session_dir = report_root.join(chrono::Local::now().format("%Y%m%d-%H%M%S").to_string());
    match write_session(&pipeline, &session_dir, started.elapsed(), settings.smoothing_window) {
        Ok(()) => info!(dir = %session_dir.display(), "session report written"),
        Err(e) => warn!(error = %e, "failed to write session report"),
    }
    Ok(())
}

fn log_status(pipeline: &Pipeline) {
    let counts = pipeline.event_counts();
    let rate = pipeline.heart_rate();
    let diag = pipeline.diagnostics();
    info!(
        health = ?pipeline.health(),
        bpm = rate.current_bpm.map(|b| format!("{b:.0}")).unwrap_or_else(|| "--".into()),
        beats = counts.beats,
        artifacts = counts.artifacts,
        samples = diag.samples,
        skipped = diag.skipped,
        "status"
    );
}

fn write_session(
    pipeline: &Pipeline,
    dir: &Path,
    elapsed: Duration,
    smoothing_window: usize,
) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let events = pipeline.all_events();
    let rate = pipeline.heart_rate();

    write_waveform_csv(
        BufWriter::new(File::create(dir.join("waveform.csv"))?),
        &pipeline.current_waveform(),
    )?;
    write_waveform_csv(
        BufWriter::new(File::create(dir.join("waveform_smoothed.csv"))?),
        &pipeline.smoothed_waveform(smoothing_window),
    )?;
    write_events_csv(BufWriter::new(File::create(dir.join("events.csv"))?), &events)?;
    write_bpm_csv(BufWriter::new(File::create(dir.join("bpm.csv"))?), &rate)?;

    let report = SessionReport::build(&events, &rate, elapsed);
    report.write_json(BufWriter::new(File::create(dir.join("summary.json"))?))?;
    info!(
        beats = report.beats,
        artifacts = report.artifacts,
        mean_bpm = report.mean_bpm.unwrap_or_default(),
        "session summary"
    );
    Ok(())
}
