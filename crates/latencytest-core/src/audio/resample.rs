//! Integer up-sampling of the tone clip to the playback stream's native rate
//!
//! Only exact integer ratios are supported: every source sample is repeated
//! `target / source` times. Anything else is reported as unsupported and the
//! caller plays the clip at its declared rate instead.

use std::sync::Arc;

use super::tone::ToneClip;

/// Playback buffer produced by [`adapt`]
///
/// Owned by the session for one playback session; the samples are shared with
/// the playback stream while it is queued.
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    samples: Arc<[i16]>,
    factor: u32,
}

impl PlaybackBuffer {
    /// Wrap the clip unchanged (bypass path, factor 1)
    pub fn from_clip(clip: &ToneClip) -> Self {
        Self {
            samples: clip.shared(),
            factor: 1,
        }
    }

    /// Borrow the samples
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Shared handle handed to the playback stream
    pub fn shared(&self) -> Arc<[i16]> {
        Arc::clone(&self.samples)
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Buffer size in bytes (16-bit samples)
    pub fn byte_len(&self) -> usize {
        self.samples.len() * std::mem::size_of::<i16>()
    }

    /// Duplication factor applied to the source clip
    pub fn factor(&self) -> u32 {
        self.factor
    }
}

/// Up-sample `clip` from `source_rate_hz` to `target_rate_hz` by duplication
///
/// Returns `None` when the target rate is zero (bypass) or is not a positive
/// integer multiple of the source rate.
///
/// # Example
/// ```
/// use latencytest_core::audio::resample::adapt;
/// use latencytest_core::audio::tone::ToneClip;
///
/// let clip = ToneClip::synthesize(100, 1000, 8000);
/// let buffer = adapt(&clip, 8000, 48000).unwrap();
/// assert_eq!(buffer.len(), 600);
/// assert!(adapt(&clip, 8000, 44100).is_none());
/// ```
pub fn adapt(clip: &ToneClip, source_rate_hz: u32, target_rate_hz: u32) -> Option<PlaybackBuffer> {
    if target_rate_hz == 0 || source_rate_hz == 0 {
        return None;
    }
    if target_rate_hz % source_rate_hz != 0 {
        tracing::debug!(
            source_rate_hz,
            target_rate_hz,
            "up-sampling ratio is not an integer"
        );
        return None;
    }

    let factor = target_rate_hz / source_rate_hz;
    let samples: Arc<[i16]> = clip
        .samples()
        .iter()
        .flat_map(|&s| std::iter::repeat(s).take(factor as usize))
        .collect();

    tracing::debug!(
        source_rate_hz,
        target_rate_hz,
        factor,
        samples = samples.len(),
        "playback_buffer_adapted"
    );

    Some(PlaybackBuffer { samples, factor })
}
