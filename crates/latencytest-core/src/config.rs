//! Harness configuration
//!
//! Protocol constants (window size, test duration, threshold, ...) with serde
//! defaults, loadable from a JSON file at `<data_dir>/latencytest/config.json`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_capture_frames() -> usize {
    crate::CAPTURE_FRAMES
}

fn default_capture_rate() -> u32 {
    crate::CAPTURE_RATE
}

fn default_clip_frames() -> usize {
    crate::BEEP_FRAMES
}

fn default_tone_hz() -> u32 {
    crate::TONE_FREQUENCY
}

fn default_synthesis_rate() -> u32 {
    crate::SYNTHESIS_RATE
}

fn default_clip_rate() -> u32 {
    crate::CLIP_RATE
}

fn default_test_duration() -> u32 {
    crate::TEST_DURATION
}

fn default_result_capacity() -> usize {
    crate::RESULT_CAPACITY
}

fn default_onset_threshold() -> u16 {
    crate::ONSET_THRESHOLD
}

/// How many times the playback buffer is re-issued after it drains
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackRepeats {
    /// Keep looping the tone until capture has stopped recording
    #[default]
    WhileCapturing,
    /// Re-issue exactly this many times
    Count(u32),
}

/// When the session admission lock is released on normal completion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockRelease {
    /// Only when playback runs out of repeats, whatever the capture side does
    #[default]
    PlaybackExhausted,
    /// When both playback repeats and capture cycles are exhausted
    AllExhausted,
}

/// Measurement protocol configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Frames per capture window
    #[serde(default = "default_capture_frames")]
    pub capture_frames: usize,
    /// Capture stream sample rate in Hz
    #[serde(default = "default_capture_rate")]
    pub capture_rate_hz: u32,
    /// Frames in the tone clip
    #[serde(default = "default_clip_frames")]
    pub clip_frames: usize,
    /// Tone frequency in Hz
    #[serde(default = "default_tone_hz")]
    pub tone_hz: u32,
    /// Rate the sine period is computed against
    #[serde(default = "default_synthesis_rate")]
    pub synthesis_rate_hz: u32,
    /// Rate the clip is declared at for playback
    #[serde(default = "default_clip_rate")]
    pub clip_rate_hz: u32,
    /// Capture cycles per session
    #[serde(default = "default_test_duration")]
    pub test_duration: u32,
    /// Latency slots kept per session
    #[serde(default = "default_result_capacity")]
    pub result_capacity: usize,
    /// Peak amplitude a window must exceed to count as tone
    #[serde(default = "default_onset_threshold")]
    pub onset_threshold: u16,
    /// Playback loop policy
    #[serde(default)]
    pub playback_repeats: PlaybackRepeats,
    /// Admission lock release policy
    #[serde(default)]
    pub lock_release: LockRelease,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            capture_frames: default_capture_frames(),
            capture_rate_hz: default_capture_rate(),
            clip_frames: default_clip_frames(),
            tone_hz: default_tone_hz(),
            synthesis_rate_hz: default_synthesis_rate(),
            clip_rate_hz: default_clip_rate(),
            test_duration: default_test_duration(),
            result_capacity: default_result_capacity(),
            onset_threshold: default_onset_threshold(),
            playback_repeats: PlaybackRepeats::default(),
            lock_release: LockRelease::default(),
        }
    }
}

impl HarnessConfig {
    /// Config file path: `<data_dir>/latencytest/config.json`
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("latencytest")
            .join("config.json")
    }

    /// Load config from disk, falling back to defaults on any error
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config from disk");
                    config.sanitized()
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }

    /// Replace zero rates, sizes and durations with defaults
    pub fn sanitized(mut self) -> Self {
        if self.capture_frames == 0 {
            self.capture_frames = default_capture_frames();
        }
        if self.capture_rate_hz == 0 {
            self.capture_rate_hz = default_capture_rate();
        }
        if self.clip_rate_hz == 0 {
            self.clip_rate_hz = default_clip_rate();
        }
        if self.synthesis_rate_hz == 0 {
            self.synthesis_rate_hz = default_synthesis_rate();
        }
        if self.tone_hz == 0 {
            self.tone_hz = default_tone_hz();
        }
        if self.test_duration == 0 {
            self.test_duration = default_test_duration();
        }
        self
    }

    /// Wall-clock length of one session's capture window, in milliseconds
    pub fn test_window_ms(&self) -> u64 {
        let frames = self.capture_frames as u64 * self.test_duration as u64;
        frames * 1000 / self.capture_rate_hz.max(1) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HarnessConfig::default();
        assert_eq!(config.capture_frames, 16);
        assert_eq!(config.capture_rate_hz, 16000);
        assert_eq!(config.test_duration, 5000);
        assert_eq!(config.result_capacity, 10);
        assert_eq!(config.onset_threshold, 1000);
        assert_eq!(config.playback_repeats, PlaybackRepeats::WhileCapturing);
        assert_eq!(config.lock_release, LockRelease::PlaybackExhausted);
    }

    #[test]
    fn test_test_window() {
        // 5000 windows of 16 frames at 16kHz
        assert_eq!(HarnessConfig::default().test_window_ms(), 5000);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let json = r#"{"test_duration": 200, "lock_release": "all_exhausted"}"#;
        let config: HarnessConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.test_duration, 200);
        assert_eq!(config.lock_release, LockRelease::AllExhausted);
        assert_eq!(config.capture_frames, 16);
        assert_eq!(config.result_capacity, 10);
    }

    #[test]
    fn test_playback_repeats_json() {
        let json = r#"{"playback_repeats": {"count": 3}}"#;
        let config: HarnessConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.playback_repeats, PlaybackRepeats::Count(3));

        let json = serde_json::to_string(&HarnessConfig::default()).unwrap();
        assert!(json.contains("\"while_capturing\""));
    }

    #[test]
    fn test_sanitized() {
        let config = HarnessConfig {
            capture_frames: 0,
            test_duration: 0,
            capture_rate_hz: 0,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(config.capture_frames, 16);
        assert_eq!(config.test_duration, 5000);
        assert_eq!(config.capture_rate_hz, 16000);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = HarnessConfig {
            test_duration: 1234,
            result_capacity: 4,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = HarnessConfig::load(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_or_invalid_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        assert_eq!(HarnessConfig::load(&missing), HarnessConfig::default());

        let invalid = dir.path().join("invalid.json");
        std::fs::write(&invalid, "not json").unwrap();
        assert_eq!(HarnessConfig::load(&invalid), HarnessConfig::default());
    }
}
