//! Ping-pong capture buffer bookkeeping
//!
//! Two pre-allocated capture buffers alternate in the input queue. Completions
//! arrive strictly in enqueue order, so the buffer that just completed follows
//! from how many cycles have elapsed: A, B, A, B, ...
//!
//! The completed buffer is handed back to the queue only after the onset
//! detector has read it, which keeps the stream and the detector off the same
//! buffer at the same time.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::host::{CaptureStream, StreamError};

/// One of the two capture buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureSlot {
    A,
    B,
}

impl CaptureSlot {
    /// Index into [`CaptureBuffers`]
    pub fn index(self) -> usize {
        match self {
            CaptureSlot::A => 0,
            CaptureSlot::B => 1,
        }
    }

    /// The other buffer
    pub fn other(self) -> Self {
        match self {
            CaptureSlot::A => CaptureSlot::B,
            CaptureSlot::B => CaptureSlot::A,
        }
    }
}

/// The two fixed-size capture buffers, allocated once
///
/// Completion paths only use [`try_read`](Self::try_read) and
/// [`try_write`](Self::try_write); the ping-pong order keeps the capture
/// stream and the detector on different buffers.
#[derive(Debug)]
pub struct CaptureBuffers {
    slots: [Mutex<Box<[i16]>>; 2],
    frames: usize,
}

impl CaptureBuffers {
    /// Allocate both buffers with `frames` samples each
    pub fn new(frames: usize) -> Self {
        Self {
            slots: [
                Mutex::new(vec![0i16; frames].into_boxed_slice()),
                Mutex::new(vec![0i16; frames].into_boxed_slice()),
            ],
            frames,
        }
    }

    /// Samples per buffer
    pub fn frames(&self) -> usize {
        self.frames
    }

    fn lock(&self, slot: CaptureSlot) -> MutexGuard<'_, Box<[i16]>> {
        match self.slots[slot.index()].lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Run `f` over the samples of `slot`
    pub fn read<R>(&self, slot: CaptureSlot, f: impl FnOnce(&[i16]) -> R) -> R {
        f(&self.lock(slot))
    }

    /// Run `f` with mutable access to the samples of `slot`
    pub fn write<R>(&self, slot: CaptureSlot, f: impl FnOnce(&mut [i16]) -> R) -> R {
        f(&mut self.lock(slot))
    }

    /// Like [`read`](Self::read) but gives up instead of waiting on a held buffer
    pub fn try_read<R>(&self, slot: CaptureSlot, f: impl FnOnce(&[i16]) -> R) -> Option<R> {
        match self.slots[slot.index()].try_lock() {
            Ok(guard) => Some(f(&guard)),
            Err(std::sync::TryLockError::Poisoned(poisoned)) => Some(f(&poisoned.into_inner())),
            Err(std::sync::TryLockError::WouldBlock) => None,
        }
    }

    /// Like [`write`](Self::write) but gives up instead of waiting on a held buffer
    pub fn try_write<R>(&self, slot: CaptureSlot, f: impl FnOnce(&mut [i16]) -> R) -> Option<R> {
        match self.slots[slot.index()].try_lock() {
            Ok(mut guard) => Some(f(&mut guard)),
            Err(std::sync::TryLockError::Poisoned(poisoned)) => {
                Some(f(&mut poisoned.into_inner()))
            }
            Err(std::sync::TryLockError::WouldBlock) => None,
        }
    }

}

/// What the capture queue should do after a completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleAction {
    /// Hand this buffer back to the queue
    Requeue(CaptureSlot),
    /// Test duration exhausted: stop recording
    Stop,
}

/// Result of one capture completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleStep {
    /// Buffer that was just filled
    pub completed: CaptureSlot,
    /// Cycles left after this one
    pub remaining: u32,
    /// Follow-up for the capture queue
    pub action: CycleAction,
}

impl CycleStep {
    /// Carry out the follow-up on the capture queue
    pub fn apply(&self, stream: &dyn CaptureStream) -> Result<(), StreamError> {
        match self.action {
            CycleAction::Requeue(slot) => stream.enqueue(slot),
            CycleAction::Stop => {
                stream.set_recording(false)?;
                stream.clear()
            }
        }
    }
}

/// Capture cycle countdown and buffer alternation
///
/// # Example
/// ```
/// use latencytest_core::audio::cycler::{CaptureSlot, CycleAction, StreamBufferCycler};
///
/// let cycler = StreamBufferCycler::new();
/// cycler.arm(3);
///
/// let step = cycler.on_buffer_completed().unwrap();
/// assert_eq!(step.completed, CaptureSlot::A);
/// assert_eq!(step.action, CycleAction::Requeue(CaptureSlot::A));
/// ```
#[derive(Debug, Default)]
pub struct StreamBufferCycler {
    /// Cycles the session was armed with
    total: AtomicU32,
    /// Cycles still to complete
    remaining: AtomicU32,
}

impl StreamBufferCycler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the countdown for a new session
    pub fn arm(&self, cycles: u32) {
        self.total.store(cycles, Ordering::Release);
        self.remaining.store(cycles, Ordering::Release);
    }

    /// Cycles still to complete
    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Acquire)
    }

    /// Cycles completed since the last [`arm`](Self::arm)
    pub fn completed(&self) -> u32 {
        self.total
            .load(Ordering::Acquire)
            .saturating_sub(self.remaining())
    }

    /// Drop the countdown to zero so no further completion is accepted
    pub fn disarm(&self) {
        self.remaining.store(0, Ordering::Release);
    }

    /// Account for one filled capture buffer
    ///
    /// Returns `None` when the countdown is already exhausted, which only
    /// happens for a completion that arrives after the session stopped.
    pub fn on_buffer_completed(&self) -> Option<CycleStep> {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| r.checked_sub(1))
            .ok()?;
        let remaining = previous - 1;
        let elapsed = self.total.load(Ordering::Acquire).saturating_sub(previous);

        let completed = if elapsed % 2 == 0 {
            CaptureSlot::A
        } else {
            CaptureSlot::B
        };

        let action = if remaining > 0 {
            CycleAction::Requeue(completed)
        } else {
            CycleAction::Stop
        };

        tracing::trace!(?completed, remaining, "capture_cycle");

        Some(CycleStep {
            completed,
            remaining,
            action,
        })
    }
}
