use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use heartline_core::engine::clock::{MonotonicClock, VirtualClock};
use heartline_core::source::ScriptedSource;
use heartline_core::{
    AcquisitionError, Event, EventKind, HealthEvent, HealthStatus, PauseReason, Pipeline,
    PipelineConfig, Timestamp,
};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

/// Pulse onsets, ms. Each pulse is a 40 ms triangle peaking 20 ms after onset.
const PULSE_ONSETS_MS: [u64; 5] = [1_200, 1_800, 2_400, 3_000, 3_600];
const PULSE_HEIGHT: f32 = 2_000.0;

fn pulse_train_at(t_ms: u64) -> f32 {
    PULSE_ONSETS_MS
        .iter()
        .find(|&&onset| t_ms >= onset && t_ms < onset + 40)
        .map(|&onset| {
            let phase = (t_ms - onset) as f32;
            PULSE_HEIGHT * (1.0 - (phase - 20.0).abs() / 20.0)
        })
        .unwrap_or(0.0)
}

/// 250 Hz pulse train for 4.4 s, then the ADC stops answering.
fn pulse_train_source() -> ScriptedSource {
    ScriptedSource::new(|n| {
        let t_ms = n * 4;
        if t_ms >= 4_400 {
            Err(AcquisitionError::NotResponding)
        } else {
            Ok(pulse_train_at(t_ms))
        }
    })
}

fn direct_config() -> PipelineConfig {
    PipelineConfig {
        read_timeout_ms: None,
        ..PipelineConfig::default()
    }
}

fn recv_health_until(
    rx: &mut broadcast::Receiver<HealthEvent>,
    wanted: HealthStatus,
    timeout: Duration,
) -> Vec<HealthStatus> {
    let start = Instant::now();
    let mut seen = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(ev) => {
                seen.push(ev.status);
                if ev.status == wanted {
                    return seen;
                }
            }
            Err(TryRecvError::Empty) => {
                if start.elapsed() >= timeout {
                    panic!("timed out waiting for {wanted:?}, saw {seen:?}");
                }
                thread::sleep(Duration::from_millis(2));
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => panic!("health channel closed unexpectedly"),
        }
    }
}

#[test]
fn clean_pulse_train_yields_exactly_five_beats() {
    let clock = Arc::new(VirtualClock::new());
    let pipeline = Pipeline::with_clock(pulse_train_source(), clock.clone());
    let mut health_rx = pipeline.subscribe_health();
    let mut event_rx = pipeline.subscribe_events();

    pipeline.start(direct_config()).expect("start");
    let seen = recv_health_until(
        &mut health_rx,
        HealthStatus::Paused(PauseReason::SourceUnavailable),
        Duration::from_secs(10),
    );
    assert_eq!(seen[0], HealthStatus::Running);
    pipeline.stop().expect("stop");

    let beats = pipeline.query(Timestamp::ZERO, Timestamp::from_millis(4_000));
    let expected: Vec<Event> = PULSE_ONSETS_MS
        .iter()
        .map(|&onset| Event {
            timestamp: Timestamp::from_millis(onset + 20),
            amplitude_at_peak: PULSE_HEIGHT,
            kind: EventKind::Beat,
        })
        .collect();
    assert_eq!(beats, expected);
    assert!(pipeline.all_events().iter().all(|e| e.kind == EventKind::Beat));

    // Same events were pushed to subscribers, in order.
    let pushed: Vec<Event> = std::iter::from_fn(|| event_rx.try_recv().ok()).collect();
    assert_eq!(pushed, expected);

    let rate = pipeline.heart_rate();
    let bpm = rate.current_bpm.expect("bpm after five beats");
    assert!((bpm - 100.0).abs() < 0.01, "bpm {bpm}");
    assert_eq!(rate.rr_intervals_ms.len(), 4);

    // Newest sample is 4396 ms: a 3 s window starts after the first beat.
    let recent = pipeline.recent_events(Duration::from_secs(3));
    assert_eq!(recent.len(), 4);
    assert_eq!(recent[0].timestamp, Timestamp::from_millis(1_820));

    let counts = pipeline.event_counts();
    assert_eq!((counts.beats, counts.artifacts), (5, 0));
}

#[test]
fn waveform_timestamps_follow_the_sample_grid() {
    let clock = Arc::new(VirtualClock::new());
    let pipeline = Pipeline::with_clock(pulse_train_source(), clock.clone());
    let mut health_rx = pipeline.subscribe_health();

    pipeline.start(direct_config()).expect("start");
    recv_health_until(
        &mut health_rx,
        HealthStatus::Paused(PauseReason::SourceUnavailable),
        Duration::from_secs(10),
    );
    pipeline.stop().expect("stop");

    let waveform = pipeline.current_waveform();
    assert_eq!(waveform.len(), 1_100);
    assert!(waveform
        .iter()
        .enumerate()
        .all(|(k, s)| s.timestamp == Timestamp(k as u64 * 4_000)));

    let diag = pipeline.diagnostics();
    assert_eq!(diag.samples, 1_100);
    assert_eq!(diag.beats, 5);
    assert!(diag.skipped >= 3);

    let smooth = pipeline.smoothed_waveform(5);
    assert_eq!(smooth.len(), waveform.len());
    assert!(smooth.iter().map(|s| s.amplitude).fold(0.0, f32::max) < PULSE_HEIGHT);
}

#[test]
fn stop_completes_within_a_few_periods() {
    let pipeline = Pipeline::new(ScriptedSource::new(|_| Ok(0.0)));
    pipeline.start(direct_config()).expect("start");
    thread::sleep(Duration::from_millis(60));

    let start = Instant::now();
    pipeline.stop().expect("stop");
    let elapsed = start.elapsed();

    assert!(
        elapsed < Duration::from_millis(40),
        "stop took {:?} (target < 40ms)",
        elapsed
    );
    assert_eq!(pipeline.health(), HealthStatus::Stopped);
    let produced = pipeline.diagnostics().samples;
    assert!(produced >= 5, "only {produced} samples in 60 ms");
}

#[test]
fn pipelines_do_not_share_state() {
    let beats = Pipeline::with_clock(pulse_train_source(), Arc::new(VirtualClock::new()));
    let flat = Pipeline::with_clock(
        ScriptedSource::new(|_| Ok(0.0)),
        Arc::new(VirtualClock::new()),
    );
    let mut health_rx = beats.subscribe_health();
    let mut flat_events = flat.subscribe_events();

    flat.start(direct_config()).expect("start flat");
    beats.start(direct_config()).expect("start beats");
    recv_health_until(
        &mut health_rx,
        HealthStatus::Paused(PauseReason::SourceUnavailable),
        Duration::from_secs(10),
    );
    beats.stop().expect("stop beats");
    flat.stop().expect("stop flat");

    assert_eq!(beats.all_events().len(), 5);
    assert!(flat.all_events().is_empty());
    assert!(matches!(flat_events.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(flat.heart_rate().current_bpm, None);
    assert_eq!(flat.health(), HealthStatus::Stopped);
}

#[test]
fn hung_read_times_out_and_late_value_is_dropped() {
    const STALE: f32 = 9_999.0;
    let source = ScriptedSource::new(|n| {
        if n == 20 {
            thread::sleep(Duration::from_millis(150));
            Ok(STALE)
        } else {
            Ok(0.0)
        }
    });
    let pipeline = Pipeline::with_clock(source, Arc::new(MonotonicClock::new()));
    let mut health_rx = pipeline.subscribe_health();

    let config = PipelineConfig {
        read_timeout_ms: Some(10),
        ..PipelineConfig::default()
    };
    pipeline.start(config).expect("start");

    let seen = recv_health_until(
        &mut health_rx,
        HealthStatus::Paused(PauseReason::SourceUnavailable),
        Duration::from_secs(2),
    );
    assert_eq!(seen, vec![
        HealthStatus::Running,
        HealthStatus::Paused(PauseReason::SourceUnavailable)
    ]);
    recv_health_until(&mut health_rx, HealthStatus::Running, Duration::from_secs(2));
    thread::sleep(Duration::from_millis(20));
    pipeline.stop().expect("stop");

    let waveform = pipeline.current_waveform();
    assert!(waveform.iter().all(|s| s.amplitude != STALE));
    assert!(waveform.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert!(pipeline.diagnostics().skipped >= 3);
}
