//! Tone clip synthesis for round-trip latency measurement
//!
//! Builds the beep that is looped through the output stream. The first half of
//! the clip is a full-scale sine, the second half is silence, so every loop
//! iteration presents the capture side with one clean rising edge.

use std::f64::consts::PI;
use std::sync::Arc;

/// Immutable mono tone clip of signed 16-bit samples
///
/// Cloning is cheap: the samples are shared.
///
/// # Example
/// ```
/// use latencytest_core::audio::tone::ToneClip;
///
/// let clip = ToneClip::synthesize(4000, 4000, 44100);
/// assert_eq!(clip.len(), 4000);
/// assert!(clip.samples()[2000..].iter().all(|&s| s == 0));
/// ```
#[derive(Debug, Clone)]
pub struct ToneClip {
    samples: Arc<[i16]>,
}

impl ToneClip {
    /// Synthesize a tone clip
    ///
    /// # Arguments
    /// * `length_frames` - Total clip length in frames
    /// * `tone_hz` - Sine frequency in Hz
    /// * `source_rate_hz` - Rate the sine period is computed against
    pub fn synthesize(length_frames: usize, tone_hz: u32, source_rate_hz: u32) -> Self {
        let period = source_rate_hz as f64 / tone_hz.max(1) as f64;
        let samples: Arc<[i16]> = (0..length_frames)
            .map(|i| {
                if 2 * i < length_frames {
                    let value = (2.0 * PI * i as f64 / period).sin() * 32768.0;
                    value.clamp(-(i16::MAX as f64), i16::MAX as f64) as i16
                } else {
                    0
                }
            })
            .collect();

        tracing::debug!(
            frames = length_frames,
            tone_hz,
            source_rate_hz,
            "tone_clip_synthesized"
        );

        Self { samples }
    }

    /// Borrow the clip samples
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Shared handle to the clip samples, used when the clip is played unadapted
    pub fn shared(&self) -> Arc<[i16]> {
        Arc::clone(&self.samples)
    }

    /// Number of frames in the clip
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the clip has no frames
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Clip size in bytes (16-bit samples)
    pub fn byte_len(&self) -> usize {
        self.samples.len() * std::mem::size_of::<i16>()
    }
}
