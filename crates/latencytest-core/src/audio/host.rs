//! Host audio collaborator traits
//!
//! The latency protocol only needs three things from the platform: an output
//! queue that accepts whole PCM buffers and reports when each one drained, an
//! input queue that fills pre-allocated buffers and reports when each one is
//! full, and a monotonic millisecond clock. Backends implement [`AudioHost`];
//! see [`super::cpal_host`] and [`super::sim`].

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use super::cycler::{CaptureBuffers, CaptureSlot};

/// Errors reported by host backends
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Audio engine has not been created")]
    EngineNotCreated,

    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("Unsupported PCM format: {0}")]
    UnsupportedFormat(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// PCM format descriptor: mono, signed 16-bit little-endian
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count (always 1 for this protocol)
    pub channels: u16,
}

impl PcmFormat {
    /// Mono 16-bit format at the given rate
    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }

    /// Bytes per frame
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * std::mem::size_of::<i16>()
    }
}

/// Output buffer queue
pub trait PlaybackStream: Send + Sync {
    /// Queue a whole buffer for playback
    fn enqueue(&self, buffer: Arc<[i16]>) -> Result<(), StreamError>;

    /// Rate the stream actually runs at, which may differ from the one requested
    fn sample_rate(&self) -> u32;

    /// Drop every queued buffer without completion notifications
    fn clear(&self) -> Result<(), StreamError>;
}

/// Input buffer queue over the two pre-allocated capture buffers
pub trait CaptureStream: Send + Sync {
    /// Queue a capture buffer to be filled
    fn enqueue(&self, slot: CaptureSlot) -> Result<(), StreamError>;

    /// Drop every queued buffer without completion notifications
    fn clear(&self) -> Result<(), StreamError>;

    /// Start or stop recording
    fn set_recording(&self, recording: bool) -> Result<(), StreamError>;
}

/// Called each time a playback buffer finished playing, with that buffer
pub type PlaybackCallback = Box<dyn Fn(&dyn PlaybackStream, Arc<[i16]>) + Send + Sync + 'static>;

/// Called each time a capture buffer has been filled
pub type CaptureCallback = Box<dyn Fn(&dyn CaptureStream) + Send + Sync + 'static>;

/// Platform audio subsystem
///
/// Completion callbacks run on backend threads and are invoked with the
/// queue that completed, strictly in enqueue order per stream.
pub trait AudioHost {
    /// Initialize the engine and output mix
    fn create_engine(&mut self) -> Result<(), StreamError>;

    /// Open the output stream
    fn open_playback(
        &mut self,
        format: PcmFormat,
        buffer_hint_bytes: u32,
        on_complete: PlaybackCallback,
    ) -> Result<Arc<dyn PlaybackStream>, StreamError>;

    /// Open the input stream writing into `buffers`
    fn open_capture(
        &mut self,
        format: PcmFormat,
        buffers: Arc<CaptureBuffers>,
        on_complete: CaptureCallback,
    ) -> Result<Arc<dyn CaptureStream>, StreamError>;

    /// Destroy all streams and the engine. Safe to call repeatedly.
    fn destroy(&mut self);

    /// Human-readable device description for reports
    fn device_name(&self) -> Option<String> {
        None
    }
}

/// Monotonic millisecond clock
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary fixed origin
    fn now_ms(&self) -> i64;
}

/// [`Clock`] backed by [`Instant`]
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> i64 {
        self.origin.elapsed().as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_format() {
        let format = PcmFormat::mono(16000);
        assert_eq!(format.channels, 1);
        assert_eq!(format.frame_bytes(), 2);
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let a = clock.now_ms();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = clock.now_ms();
        assert!(b >= a + 5, "clock went from {} to {}", a, b);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            StreamError::PermissionDenied.to_string(),
            "Microphone permission denied"
        );
        assert_eq!(
            StreamError::Backend("boom".into()).to_string(),
            "Backend error: boom"
        );
    }
}
