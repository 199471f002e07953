//! Deterministic in-process audio host
//!
//! [`SimulatedHost`] implements [`AudioHost`] without hardware: completions
//! fire only when the driver calls [`SimPlayback::complete`] or
//! [`SimCapture::complete_with`], on whatever thread calls them. Paired with
//! [`ManualClock`] this drives whole sessions with exact timing, including
//! concurrent completions from two threads.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::cycler::{CaptureBuffers, CaptureSlot};
use super::host::{
    AudioHost, CaptureCallback, CaptureStream, Clock, PcmFormat, PlaybackCallback,
    PlaybackStream, StreamError,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    /// Jump to an absolute time
    pub fn set(&self, ms: i64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }

    /// Move forward by `ms`
    pub fn advance(&self, ms: i64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Simulated output queue
pub struct SimPlayback {
    format: PcmFormat,
    queue: Mutex<VecDeque<Arc<[i16]>>>,
    enqueued: AtomicUsize,
    on_complete: PlaybackCallback,
}

impl SimPlayback {
    /// Format the stream was opened with
    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// Buffers currently queued
    pub fn queued(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Total buffers ever enqueued
    pub fn enqueued(&self) -> usize {
        self.enqueued.load(Ordering::SeqCst)
    }

    /// Copy of the buffer at the head of the queue
    pub fn front(&self) -> Option<Arc<[i16]>> {
        lock(&self.queue).front().cloned()
    }

    /// Finish playing the head buffer and notify
    ///
    /// Returns `false` when nothing was queued.
    pub fn complete(&self) -> bool {
        let Some(finished) = lock(&self.queue).pop_front() else {
            return false;
        };
        (self.on_complete)(self, finished);
        true
    }
}

impl PlaybackStream for SimPlayback {
    fn enqueue(&self, buffer: Arc<[i16]>) -> Result<(), StreamError> {
        lock(&self.queue).push_back(buffer);
        self.enqueued.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    fn clear(&self) -> Result<(), StreamError> {
        lock(&self.queue).clear();
        Ok(())
    }
}

/// Simulated input queue
pub struct SimCapture {
    format: PcmFormat,
    buffers: Arc<CaptureBuffers>,
    queue: Mutex<VecDeque<CaptureSlot>>,
    recording: AtomicBool,
    on_complete: CaptureCallback,
}

impl SimCapture {
    /// Format the stream was opened with
    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// Whether the recorder is in the recording state
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Slots currently queued, head first
    pub fn queued(&self) -> Vec<CaptureSlot> {
        lock(&self.queue).iter().copied().collect()
    }

    /// Fill the head buffer with `samples` (zero-padded) and notify
    ///
    /// Returns `false` when not recording or nothing is queued.
    pub fn complete_with(&self, samples: &[i16]) -> bool {
        if !self.is_recording() {
            return false;
        }
        let Some(slot) = lock(&self.queue).pop_front() else {
            return false;
        };
        self.buffers.write(slot, |buffer| {
            let n = samples.len().min(buffer.len());
            buffer[..n].copy_from_slice(&samples[..n]);
            buffer[n..].fill(0);
        });
        (self.on_complete)(self);
        true
    }

    /// Fill the head buffer with a constant `level` and notify
    pub fn complete_with_level(&self, level: i16) -> bool {
        let window = vec![level; self.buffers.frames()];
        self.complete_with(&window)
    }
}

impl CaptureStream for SimCapture {
    fn enqueue(&self, slot: CaptureSlot) -> Result<(), StreamError> {
        lock(&self.queue).push_back(slot);
        Ok(())
    }

    fn clear(&self) -> Result<(), StreamError> {
        lock(&self.queue).clear();
        Ok(())
    }

    fn set_recording(&self, recording: bool) -> Result<(), StreamError> {
        self.recording.store(recording, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct SimState {
    engine_created: AtomicBool,
    deny_capture: AtomicBool,
    /// Playback rate granted regardless of the request (0 = as requested)
    granted_playback_rate: AtomicU32,
    destroy_count: AtomicUsize,
    playback: Mutex<Option<Arc<SimPlayback>>>,
    capture: Mutex<Option<Arc<SimCapture>>>,
}

/// Hardware-free [`AudioHost`]; clones share the same streams
#[derive(Clone, Default)]
pub struct SimulatedHost {
    state: Arc<SimState>,
}

impl SimulatedHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next capture open fail as if microphone access was refused
    pub fn deny_capture(&self, deny: bool) {
        self.state.deny_capture.store(deny, Ordering::SeqCst);
    }

    /// Open playback at `rate` whatever was requested, like a device that
    /// rejects the requested rate and falls back to its own
    pub fn grant_playback_rate(&self, rate: Option<u32>) {
        self.state
            .granted_playback_rate
            .store(rate.unwrap_or(0), Ordering::SeqCst);
    }

    /// The open playback stream, if any
    pub fn playback(&self) -> Option<Arc<SimPlayback>> {
        lock(&self.state.playback).clone()
    }

    /// The open capture stream, if any
    pub fn capture(&self) -> Option<Arc<SimCapture>> {
        lock(&self.state.capture).clone()
    }

    /// Whether the engine exists
    pub fn engine_created(&self) -> bool {
        self.state.engine_created.load(Ordering::SeqCst)
    }

    /// How many times [`AudioHost::destroy`] ran
    pub fn destroy_count(&self) -> usize {
        self.state.destroy_count.load(Ordering::SeqCst)
    }
}

impl AudioHost for SimulatedHost {
    fn create_engine(&mut self) -> Result<(), StreamError> {
        self.state.engine_created.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn open_playback(
        &mut self,
        format: PcmFormat,
        _buffer_hint_bytes: u32,
        on_complete: PlaybackCallback,
    ) -> Result<Arc<dyn PlaybackStream>, StreamError> {
        if !self.engine_created() {
            return Err(StreamError::EngineNotCreated);
        }
        let granted = self.state.granted_playback_rate.load(Ordering::SeqCst);
        let format = if granted == 0 {
            format
        } else {
            PcmFormat::mono(granted)
        };
        let stream = Arc::new(SimPlayback {
            format,
            queue: Mutex::new(VecDeque::new()),
            enqueued: AtomicUsize::new(0),
            on_complete,
        });
        *lock(&self.state.playback) = Some(Arc::clone(&stream));
        Ok(stream)
    }

    fn open_capture(
        &mut self,
        format: PcmFormat,
        buffers: Arc<CaptureBuffers>,
        on_complete: CaptureCallback,
    ) -> Result<Arc<dyn CaptureStream>, StreamError> {
        if !self.engine_created() {
            return Err(StreamError::EngineNotCreated);
        }
        if self.state.deny_capture.load(Ordering::SeqCst) {
            return Err(StreamError::PermissionDenied);
        }
        let stream = Arc::new(SimCapture {
            format,
            buffers,
            queue: Mutex::new(VecDeque::new()),
            recording: AtomicBool::new(false),
            on_complete,
        });
        *lock(&self.state.capture) = Some(Arc::clone(&stream));
        Ok(stream)
    }

    fn destroy(&mut self) {
        lock(&self.state.playback).take();
        lock(&self.state.capture).take();
        self.state.engine_created.store(false, Ordering::SeqCst);
        self.state.destroy_count.fetch_add(1, Ordering::SeqCst);
    }

    fn device_name(&self) -> Option<String> {
        Some("Simulated loopback".to_string())
    }
}
