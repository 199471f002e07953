//! E2E tests for a full measurement session
//!
//! Replays the reference scenario (5000 one-millisecond windows with the tone
//! present in windows 100 to 150) and checks the session lifecycle around it.

use latencytest::audio::session::SessionPhase;
use latencytest::audio::sim::{ManualClock, SimulatedHost};
use latencytest::config::{LockRelease, PlaybackRepeats};
use latencytest::{AudioLatencyHarness, HarnessConfig, StartOutcome};
use std::sync::Arc;

fn ready_harness(config: HarnessConfig) -> (AudioLatencyHarness<SimulatedHost>, SimulatedHost, Arc<ManualClock>) {
    let host = SimulatedHost::new();
    let clock = Arc::new(ManualClock::new(0));
    let mut harness = AudioLatencyHarness::with_clock(host.clone(), config, clock.clone());
    harness.create_engine().unwrap();
    harness.create_playback_stream(0, 0).unwrap();
    harness.create_capture_stream().unwrap();
    (harness, host, clock)
}

fn level_for(window: u32) -> i16 {
    if (100..=150).contains(&window) {
        5000
    } else {
        50
    }
}

#[test]
fn test_reference_session() {
    let (harness, host, clock) = ready_harness(HarnessConfig::default());
    assert_eq!(harness.start().unwrap(), StartOutcome::Started);

    let playback = host.playback().unwrap();
    let capture = host.capture().unwrap();

    // the tone drains once at t=0 and is re-issued
    assert!(playback.complete());
    assert_eq!(harness.session().last_playback_issue_ms(), 0);

    for window in 0..5000u32 {
        clock.advance(1);
        assert!(capture.complete_with_level(level_for(window)), "window {}", window);
    }

    assert_eq!(harness.onset_count(), 1);
    let results = harness.fetch_results();
    // window 100 completes at t=101
    assert!((100..=102).contains(&results[0]), "latency {}", results[0]);
    assert!(results[1..].iter().all(|&r| r == 0));

    // capture is done and the recorder stopped
    assert_eq!(harness.session().remaining_capture_cycles(), 0);
    assert!(!capture.is_recording());
    assert!(!capture.complete_with_level(5000));
    assert_eq!(harness.onset_count(), 1);
}

#[test]
fn test_playback_release_waits_for_playback() {
    let (harness, host, clock) = ready_harness(HarnessConfig {
        test_duration: 10,
        ..Default::default()
    });
    harness.start().unwrap();

    let capture = host.capture().unwrap();
    for _ in 0..10 {
        clock.advance(1);
        assert!(capture.complete_with_level(0));
    }

    // capture is exhausted but the tone is still queued
    assert!(harness.is_running());
    assert_eq!(harness.start().unwrap(), StartOutcome::Busy);

    // the next drain finds no capture cycles left and ends the session
    assert!(host.playback().unwrap().complete());
    assert!(!harness.is_running());
    assert_eq!(harness.session().phase(), SessionPhase::Idle);
    assert_eq!(harness.start().unwrap(), StartOutcome::Started);
}

#[test]
fn test_counted_repeats_release_before_capture_finishes() {
    let (harness, host, clock) = ready_harness(HarnessConfig {
        playback_repeats: PlaybackRepeats::Count(2),
        ..Default::default()
    });
    harness.start().unwrap();
    let playback = host.playback().unwrap();

    assert!(playback.complete());
    assert!(playback.complete());
    assert!(harness.is_running());
    assert!(playback.complete());
    assert!(!harness.is_running());
    assert_eq!(playback.enqueued(), 3);
    assert!(!playback.complete());

    // capture keeps recording into the results of this session
    let capture = host.capture().unwrap();
    clock.advance(40);
    assert!(capture.complete_with_level(9000));
    assert_eq!(harness.onset_count(), 1);
}

#[test]
fn test_all_exhausted_release() {
    let (harness, host, clock) = ready_harness(HarnessConfig {
        test_duration: 4,
        playback_repeats: PlaybackRepeats::Count(0),
        lock_release: LockRelease::AllExhausted,
        ..Default::default()
    });
    harness.start().unwrap();

    assert!(host.playback().unwrap().complete());
    assert!(harness.is_running(), "capture cycles remain");

    let capture = host.capture().unwrap();
    for _ in 0..4 {
        clock.advance(1);
        assert!(capture.complete_with_level(0));
    }
    assert!(!harness.is_running());
}

#[test]
fn test_shutdown_mid_session_allows_new_start() {
    let (mut harness, host, clock) = ready_harness(HarnessConfig::default());
    harness.start().unwrap();

    let capture = host.capture().unwrap();
    clock.advance(5);
    capture.complete_with_level(0);

    harness.shutdown();
    assert!(!harness.is_running());
    // late completion from a torn-down stream is ignored
    capture.complete_with_level(7000);
    assert_eq!(harness.onset_count(), 0);

    harness.create_engine().unwrap();
    harness.create_playback_stream(0, 0).unwrap();
    harness.create_capture_stream().unwrap();
    assert_eq!(harness.start().unwrap(), StartOutcome::Started);
    assert_eq!(harness.session().remaining_capture_cycles(), 5000);
}
