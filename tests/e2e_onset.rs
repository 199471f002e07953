//! E2E tests for onset detection through the full harness
//!
//! Drives the simulated host window by window and checks that a run of loud
//! windows counts once, and that silence re-arms the detector.

use latencytest::audio::sim::{ManualClock, SimulatedHost};
use latencytest::{AudioLatencyHarness, HarnessConfig, StartOutcome};
use std::sync::Arc;

const LOUD: i16 = 5000;
const QUIET: i16 = 50;

fn running_harness(config: HarnessConfig) -> (AudioLatencyHarness<SimulatedHost>, SimulatedHost, Arc<ManualClock>) {
    let host = SimulatedHost::new();
    let clock = Arc::new(ManualClock::new(0));
    let mut harness = AudioLatencyHarness::with_clock(host.clone(), config, clock.clone());
    harness.create_engine().unwrap();
    harness.create_playback_stream(0, 0).unwrap();
    harness.create_capture_stream().unwrap();
    assert_eq!(harness.start().unwrap(), StartOutcome::Started);
    (harness, host, clock)
}

fn feed(host: &SimulatedHost, clock: &ManualClock, levels: &[i16]) {
    let capture = host.capture().unwrap();
    for &level in levels {
        clock.advance(1);
        assert!(capture.complete_with_level(level));
    }
}

#[test]
fn test_consecutive_loud_windows_count_once() {
    for run in [1usize, 2, 7, 40] {
        let (harness, host, clock) = running_harness(HarnessConfig::default());
        let mut levels = vec![QUIET; 3];
        levels.extend(std::iter::repeat(LOUD).take(run));
        feed(&host, &clock, &levels);

        assert_eq!(harness.onset_count(), 1, "loud run of {} windows", run);
        assert_eq!(harness.fetch_results()[0], 4);
    }
}

#[test]
fn test_silence_rearms_detector() {
    let (harness, host, clock) = running_harness(HarnessConfig::default());

    feed(&host, &clock, &[LOUD, LOUD, LOUD]);
    feed(&host, &clock, &[QUIET]);
    feed(&host, &clock, &[LOUD, LOUD]);

    assert_eq!(harness.onset_count(), 2);
    let results = harness.fetch_results();
    assert_eq!(&results[..2], &[1, 5]);
    assert!(results[2..].iter().all(|&r| r == 0));
}

#[test]
fn test_threshold_is_exclusive() {
    let (harness, host, clock) = running_harness(HarnessConfig::default());
    feed(&host, &clock, &[1000, -1000, 999]);
    assert_eq!(harness.onset_count(), 0);

    feed(&host, &clock, &[-1001]);
    assert_eq!(harness.onset_count(), 1);
}

#[test]
fn test_single_loud_sample_triggers() {
    let (harness, host, clock) = running_harness(HarnessConfig::default());
    let capture = host.capture().unwrap();

    let mut window = vec![0i16; 16];
    window[15] = i16::MIN;
    clock.advance(3);
    assert!(capture.complete_with(&window));

    assert_eq!(harness.onset_count(), 1);
    assert_eq!(harness.fetch_results()[0], 3);
}

#[test]
fn test_muted_windows_report_nothing_and_rearm() {
    let (harness, host, clock) = running_harness(HarnessConfig::default());

    harness.set_muted(true);
    feed(&host, &clock, &[LOUD, LOUD]);
    assert_eq!(harness.onset_count(), 0);

    // the latch engaged while muted, so the same tone is not reported late
    harness.set_muted(false);
    feed(&host, &clock, &[LOUD]);
    assert_eq!(harness.onset_count(), 0);

    feed(&host, &clock, &[QUIET, LOUD]);
    assert_eq!(harness.onset_count(), 1);
    assert_eq!(harness.fetch_results()[0], 5);
}
