//! Latency session state machine
//!
//! One session loops the tone through the playback queue while the capture
//! queue cycles its two buffers for a fixed number of windows:
//!
//! ```text
//! start()                  playback drained              capture filled
//!   │                            │                             │
//!   ├─ wait out old callbacks    ├─ repeats left?              ├─ cycler step (A/B, countdown)
//!   ├─ reset ring/latch          │    yes: stamp T0, requeue   ├─ detector on completed buffer
//!   ├─ queue A, B                │    no:  drop buffer,        ├─ new onset: ring.push(now - T0)
//!   ├─ stamp T0                  │         release admission   └─ requeue buffer or stop
//!   └─ queue playback
//! ```
//!
//! Both completion paths run on host audio threads and may overlap, so all
//! session state lives in atomics and neither path takes a blocking lock. The
//! playback stream hands each drained buffer back to its callback, which
//! re-queues that same buffer.
//!
//! Every completion handler counts itself in `in_flight` for its whole run.
//! `start()` first disarms the previous session and then waits for that count
//! to reach zero, so a handler of the old session can never touch the queues
//! of the new one.

use std::sync::atomic::{fence, AtomicBool, AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use super::cycler::{CaptureBuffers, CaptureSlot, CycleAction, StreamBufferCycler};
use super::host::{CaptureStream, Clock, PlaybackStream, StreamError};
use super::onset::OnsetDetector;
use super::resample::PlaybackBuffer;
use crate::config::{HarnessConfig, LockRelease, PlaybackRepeats};
use crate::stats::ring::ResultsRing;

/// Set in `exhausted` when playback has no repeats left
const PLAYBACK_DONE: u8 = 0b01;

/// Set in `exhausted` when the capture countdown reached zero
const CAPTURE_DONE: u8 = 0b10;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session holds admission
    Idle,
    /// Admission acquired, queues being primed
    Armed,
    /// Streams are delivering completions
    Running,
}

impl SessionPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionPhase::Armed,
            2 => SessionPhase::Running,
            _ => SessionPhase::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SessionPhase::Idle => 0,
            SessionPhase::Armed => 1,
            SessionPhase::Running => 2,
        }
    }
}

/// Result of a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new session is running
    Started,
    /// Another session holds admission; the request was ignored
    Busy,
}

/// Round-trip latency session shared with both stream callbacks
pub struct LatencySession {
    /// Capture cycles per session
    test_duration: u32,
    /// Playback loop policy
    repeats_policy: PlaybackRepeats,
    /// Admission release policy
    lock_release: LockRelease,
    /// Monotonic time source
    clock: Arc<dyn Clock>,
    /// Admission flag: held from `start()` until release
    admission: AtomicBool,
    /// Current [`SessionPhase`]
    phase: AtomicU8,
    /// Capture countdown and A/B alternation
    cycler: StreamBufferCycler,
    /// Onset latch over capture windows
    detector: OnsetDetector,
    /// The two capture buffers shared with the capture stream
    buffers: Arc<CaptureBuffers>,
    /// Latencies of this session
    results: ResultsRing,
    /// Playback repeats left under [`PlaybackRepeats::Count`]
    remaining_repeats: AtomicU32,
    /// When the playback buffer was last issued (ms)
    last_issue_ms: AtomicI64,
    /// Inside a tone that was already counted
    is_beeping: AtomicBool,
    /// Caller-side onset suppression
    muted: AtomicBool,
    /// `PLAYBACK_DONE | CAPTURE_DONE` bits for this session
    exhausted: AtomicU8,
    /// Completion handlers currently running
    in_flight: AtomicU32,
}

/// Counts one running completion handler
struct InFlight<'a>(&'a AtomicU32);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicU32) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for LatencySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencySession")
            .field("phase", &self.phase())
            .field("remaining_capture_cycles", &self.remaining_capture_cycles())
            .field("onset_count", &self.results.onset_count())
            .finish_non_exhaustive()
    }
}

impl LatencySession {
    /// Create an idle session sized from `config`
    pub fn new(config: &HarnessConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            test_duration: config.test_duration.max(1),
            repeats_policy: config.playback_repeats,
            lock_release: config.lock_release,
            clock,
            admission: AtomicBool::new(false),
            phase: AtomicU8::new(SessionPhase::Idle.as_u8()),
            cycler: StreamBufferCycler::new(),
            detector: OnsetDetector::new(config.onset_threshold),
            buffers: Arc::new(CaptureBuffers::new(config.capture_frames)),
            results: ResultsRing::new(config.result_capacity),
            remaining_repeats: AtomicU32::new(0),
            last_issue_ms: AtomicI64::new(0),
            is_beeping: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            exhausted: AtomicU8::new(0),
            in_flight: AtomicU32::new(0),
        }
    }

    /// Capture buffers to hand to the capture stream
    pub fn buffers(&self) -> Arc<CaptureBuffers> {
        Arc::clone(&self.buffers)
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.phase.store(phase.as_u8(), Ordering::Release);
    }

    /// Whether a session holds admission
    pub fn is_active(&self) -> bool {
        self.admission.load(Ordering::Acquire)
    }

    /// Capture cycles still to complete
    pub fn remaining_capture_cycles(&self) -> u32 {
        self.cycler.remaining()
    }

    /// Playback repeats left under a counted policy (0 otherwise)
    pub fn remaining_playback_repeats(&self) -> u32 {
        self.remaining_repeats.load(Ordering::Acquire)
    }

    /// Timestamp of the most recent playback issue (ms)
    pub fn last_playback_issue_ms(&self) -> i64 {
        self.last_issue_ms.load(Ordering::Acquire)
    }

    /// Results of the current or last session
    pub fn results(&self) -> &ResultsRing {
        &self.results
    }

    /// Snapshot of the results ring, always `capacity` long
    pub fn fetch_results(&self) -> Vec<i64> {
        self.results.snapshot()
    }

    /// Suppress (or re-enable) onset reporting
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    /// Whether onset reporting is suppressed
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    /// Begin a session
    ///
    /// Returns [`StartOutcome::Busy`] without touching anything when another
    /// session holds admission; `buffer` is only built once admission is won.
    /// On a stream error the admission is released again and the error is
    /// returned.
    ///
    /// Waits for completion handlers of a finished session that are still
    /// running, so it must not be called from inside one.
    pub fn start(
        &self,
        capture: &dyn CaptureStream,
        playback: &dyn PlaybackStream,
        buffer: impl FnOnce() -> PlaybackBuffer,
    ) -> Result<StartOutcome, StreamError> {
        if self
            .admission
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("start ignored: session already active");
            return Ok(StartOutcome::Busy);
        }
        self.set_phase(SessionPhase::Armed);
        self.cycler.disarm();
        self.wait_for_handlers();

        if let Err(e) = self.arm(capture, playback, buffer()) {
            tracing::error!(error = %e, "Failed to start latency session");
            self.cycler.disarm();
            self.release();
            return Err(e);
        }

        Ok(StartOutcome::Started)
    }

    /// Spin until no completion handler of the previous session is running
    ///
    /// The phase is no longer `Running` and the countdown is zero, so any
    /// handler entering from here on returns without touching the queues.
    fn wait_for_handlers(&self) {
        fence(Ordering::SeqCst);
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            std::hint::spin_loop();
            std::thread::yield_now();
        }
    }

    fn arm(
        &self,
        capture: &dyn CaptureStream,
        playback: &dyn PlaybackStream,
        buffer: PlaybackBuffer,
    ) -> Result<(), StreamError> {
        self.results.reset();
        self.detector.reset();
        self.is_beeping.store(false, Ordering::Release);
        self.exhausted.store(0, Ordering::Release);

        capture.set_recording(false)?;
        capture.clear()?;
        playback.clear()?;

        self.cycler.arm(self.test_duration);
        let repeats = match self.repeats_policy {
            PlaybackRepeats::Count(n) => n,
            PlaybackRepeats::WhileCapturing => 0,
        };
        self.remaining_repeats.store(repeats, Ordering::Release);

        let samples = buffer.shared();

        capture.enqueue(CaptureSlot::A)?;
        capture.enqueue(CaptureSlot::B)?;

        // Windows captured before the playback issue measure against session start
        self.last_issue_ms
            .store(self.clock.now_ms(), Ordering::Release);
        self.set_phase(SessionPhase::Running);
        capture.set_recording(true)?;

        let issued_at = self.clock.now_ms();
        self.last_issue_ms.store(issued_at, Ordering::Release);
        playback.enqueue(samples)?;

        tracing::info!(
            test_duration = self.test_duration,
            playback_samples = buffer.len(),
            upsample_factor = buffer.factor(),
            issued_at,
            "Latency session started"
        );
        Ok(())
    }

    /// Playback queue drained `drained`
    pub fn on_playback_complete(&self, stream: &dyn PlaybackStream, drained: Arc<[i16]>) {
        let _handler = InFlight::enter(&self.in_flight);
        if self.phase() != SessionPhase::Running {
            tracing::debug!("playback completion outside a running session, ignored");
            return;
        }

        // Repeats while the capture side has not stopped its recorder yet
        let repeat = match self.repeats_policy {
            PlaybackRepeats::WhileCapturing => {
                self.exhausted.load(Ordering::Acquire) & CAPTURE_DONE == 0
            }
            PlaybackRepeats::Count(_) => self
                .remaining_repeats
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| r.checked_sub(1))
                .is_ok(),
        };

        if repeat {
            let issued_at = self.clock.now_ms();
            self.last_issue_ms.store(issued_at, Ordering::Release);
            tracing::trace!(issued_at, "playback_reissued");
            match stream.enqueue(drained) {
                Ok(()) => return,
                Err(e) => tracing::error!(error = %e, "Failed to re-enqueue playback buffer"),
            }
        }

        self.playback_finished();
    }

    /// Capture queue filled one buffer
    pub fn on_capture_complete(&self, stream: &dyn CaptureStream) {
        let _handler = InFlight::enter(&self.in_flight);
        let now = self.clock.now_ms();

        let Some(step) = self.cycler.on_buffer_completed() else {
            tracing::debug!("capture completion after countdown ended, ignored");
            return;
        };

        let muted = self.muted.load(Ordering::Acquire);
        let verdict = self
            .buffers
            .try_read(step.completed, |samples| self.detector.inspect(samples, muted));

        match verdict {
            Some(verdict) => {
                if verdict.is_new_onset && !self.is_beeping.swap(true, Ordering::AcqRel) {
                    let latency_ms = now - self.last_issue_ms.load(Ordering::Acquire);
                    let stored = self.results.push(latency_ms);
                    tracing::debug!(
                        latency_ms,
                        peak = verdict.peak,
                        stored,
                        onsets = self.results.onset_count(),
                        "onset_detected"
                    );
                }
                if !verdict.latched {
                    self.is_beeping.store(false, Ordering::Release);
                }
            }
            None => tracing::debug!(slot = ?step.completed, "capture buffer busy, window skipped"),
        }

        if let Err(e) = step.apply(stream) {
            tracing::error!(error = %e, slot = ?step.completed, "Capture queue update failed");
        }

        if step.action == CycleAction::Stop {
            self.capture_finished();
        }
    }

    fn playback_finished(&self) {
        let previous = self.exhausted.fetch_or(PLAYBACK_DONE, Ordering::AcqRel);
        tracing::debug!("playback repeats exhausted");

        if previous & PLAYBACK_DONE != 0 {
            return;
        }
        let release = match self.lock_release {
            LockRelease::PlaybackExhausted => true,
            LockRelease::AllExhausted => previous & CAPTURE_DONE != 0,
        };
        if release {
            self.release();
        }
    }

    fn capture_finished(&self) {
        let previous = self.exhausted.fetch_or(CAPTURE_DONE, Ordering::AcqRel);
        tracing::debug!(
            onsets = self.results.onset_count(),
            "capture countdown exhausted"
        );

        if previous & CAPTURE_DONE == 0
            && self.lock_release == LockRelease::AllExhausted
            && previous & PLAYBACK_DONE != 0
        {
            self.release();
        }
    }

    fn release(&self) {
        self.set_phase(SessionPhase::Idle);
        self.admission.store(false, Ordering::Release);
        tracing::info!(
            onsets = self.results.onset_count(),
            stored = self.results.stored_count(),
            "Latency session finished"
        );
    }

    /// Abort any session and release admission unconditionally
    ///
    /// Idempotent; leaves the results of the aborted session readable.
    pub fn force_release(&self) {
        self.cycler.disarm();
        self.set_phase(SessionPhase::Idle);
        self.admission.store(false, Ordering::Release);
    }
}
