//! Latencytest Core - Round-trip latency protocol, tone synthesis, and host backends
//!
//! This library measures the audio round trip of a device: a synthesized tone
//! burst is looped through an output stream while an input stream captures the
//! microphone in small double-buffered windows. The first loud window after a
//! playback issue marks the onset, and the elapsed milliseconds are stored in a
//! bounded results ring.

pub mod audio;
pub mod config;
pub mod stats;

pub use audio::{
    engine::{AudioLatencyHarness, HarnessError, StartOutcome},
    host::{AudioHost, Clock, MonotonicClock, StreamError},
    session::LatencySession,
};
pub use config::HarnessConfig;
pub use stats::{ring::ResultsRing, summary::LatencySummary};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date stamped by build.rs (YYYY-MM-DD)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Frames per capture window (1ms at 16kHz)
pub const CAPTURE_FRAMES: usize = 16;

/// Capture stream sample rate in Hz
pub const CAPTURE_RATE: u32 = 16000;

/// Frames in the synthesized tone clip
pub const BEEP_FRAMES: usize = 4000;

/// Tone frequency in Hz
pub const TONE_FREQUENCY: u32 = 4000;

/// Rate the tone waveform is computed at
pub const SYNTHESIS_RATE: u32 = 44100;

/// Rate the clip is declared at when handed to the playback stream
pub const CLIP_RATE: u32 = 8000;

/// Capture cycles per measurement session
pub const TEST_DURATION: u32 = 5000;

/// Number of latency slots kept per session
pub const RESULT_CAPACITY: usize = 10;

/// Peak amplitude (16-bit scale) a capture window must exceed to count as tone
pub const ONSET_THRESHOLD: u16 = 1000;
