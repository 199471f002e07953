//! Peak-amplitude onset detection over capture windows
//!
//! A tone burst spans many consecutive capture windows. The detector latches on
//! the first window whose peak exceeds the threshold and stays latched until a
//! window falls back below it, so one burst yields exactly one onset.

use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome of inspecting one capture window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnsetVerdict {
    /// This window starts a new tone (and it was not muted)
    pub is_new_onset: bool,
    /// Latch state after this window
    pub latched: bool,
    /// Peak absolute amplitude of the window
    pub peak: u16,
}

/// Threshold detector with a one-shot latch
///
/// Only the capture completion path calls [`inspect`](Self::inspect), and
/// completions for one stream never overlap, so the latch is a plain atomic flag.
///
/// # Example
/// ```
/// use latencytest_core::audio::onset::OnsetDetector;
///
/// let detector = OnsetDetector::new(1000);
/// assert!(detector.inspect(&[0, 5000, -200], false).is_new_onset);
/// assert!(!detector.inspect(&[4000; 16], false).is_new_onset);
/// assert!(!detector.inspect(&[10; 16], false).latched);
/// ```
#[derive(Debug)]
pub struct OnsetDetector {
    threshold: u16,
    latched: AtomicBool,
}

impl OnsetDetector {
    /// Create a detector firing above `threshold` on the 16-bit scale
    pub fn new(threshold: u16) -> Self {
        Self {
            threshold,
            latched: AtomicBool::new(false),
        }
    }

    /// Peak absolute amplitude of a window
    pub fn peak(samples: &[i16]) -> u16 {
        samples
            .iter()
            .map(|s| s.unsigned_abs())
            .max()
            .unwrap_or(0)
    }

    /// Inspect one completed capture window
    ///
    /// # Arguments
    /// * `samples` - Window just filled by the capture stream
    /// * `muted` - Suppress reporting a new onset (the latch still engages)
    pub fn inspect(&self, samples: &[i16], muted: bool) -> OnsetVerdict {
        let peak = Self::peak(samples);

        if peak > self.threshold {
            let was_latched = self.latched.swap(true, Ordering::AcqRel);
            OnsetVerdict {
                is_new_onset: !was_latched && !muted,
                latched: true,
                peak,
            }
        } else {
            self.latched.store(false, Ordering::Release);
            OnsetVerdict {
                is_new_onset: false,
                latched: false,
                peak,
            }
        }
    }

    /// Current latch state
    pub fn is_latched(&self) -> bool {
        self.latched.load(Ordering::Acquire)
    }

    /// Detection threshold
    pub fn threshold(&self) -> u16 {
        self.threshold
    }

    /// Clear the latch
    pub fn reset(&self) {
        self.latched.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOUD: [i16; 16] = [5000; 16];
    const QUIET: [i16; 16] = [50; 16];

    #[test]
    fn test_peak_uses_absolute_value() {
        assert_eq!(OnsetDetector::peak(&[1, -3000, 200]), 3000);
        assert_eq!(OnsetDetector::peak(&[i16::MIN]), 32768);
        assert_eq!(OnsetDetector::peak(&[]), 0);
    }

    #[test]
    fn test_quiet_never_fires() {
        let detector = OnsetDetector::new(1000);
        for _ in 0..100 {
            let verdict = detector.inspect(&QUIET, false);
            assert!(!verdict.is_new_onset);
            assert!(!verdict.latched);
        }
    }

    #[test]
    fn test_latch_fires_once_per_run() {
        let detector = OnsetDetector::new(1000);

        for run_length in 1..20 {
            detector.reset();
            let onsets = (0..run_length)
                .filter(|_| detector.inspect(&LOUD, false).is_new_onset)
                .count();
            assert_eq!(onsets, 1, "run of {} windows", run_length);
        }
    }

    #[test]
    fn test_first_window_is_the_onset() {
        let detector = OnsetDetector::new(1000);
        assert!(detector.inspect(&LOUD, false).is_new_onset);
        assert!(!detector.inspect(&LOUD, false).is_new_onset);
    }

    #[test]
    fn test_rearm_after_silence() {
        let detector = OnsetDetector::new(1000);
        let windows = [&LOUD, &LOUD, &LOUD, &QUIET, &LOUD, &LOUD];

        let onsets = windows
            .iter()
            .filter(|w| detector.inspect(w.as_slice(), false).is_new_onset)
            .count();

        assert_eq!(onsets, 2);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let detector = OnsetDetector::new(1000);
        let verdict = detector.inspect(&[1000; 4], false);
        assert!(!verdict.is_new_onset);
        assert!(!verdict.latched);

        assert!(detector.inspect(&[1001; 4], false).is_new_onset);
    }

    #[test]
    fn test_muted_latches_without_onset() {
        let detector = OnsetDetector::new(1000);

        let verdict = detector.inspect(&LOUD, true);
        assert!(!verdict.is_new_onset);
        assert!(verdict.latched);

        // Unmuting mid-burst does not produce a late onset
        assert!(!detector.inspect(&LOUD, false).is_new_onset);
    }

    #[test]
    fn test_verdict_reports_peak() {
        let detector = OnsetDetector::new(1000);
        assert_eq!(detector.inspect(&[3, -1234, 99], false).peak, 1234);
    }
}
