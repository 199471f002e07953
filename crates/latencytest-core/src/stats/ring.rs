//! Fixed-capacity latency results storage
//!
//! Slots are allocated once at construction. Appends claim a slot with a single
//! atomic increment, so the capture callback can record a result without locks
//! or allocation. Onsets beyond capacity are counted but not stored.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

/// Bounded, append-only results for one session
///
/// # Example
/// ```
/// use latencytest_core::stats::ring::ResultsRing;
///
/// let ring = ResultsRing::new(2);
/// assert!(ring.push(12));
/// assert!(ring.push(14));
/// assert!(!ring.push(13));
/// assert_eq!(ring.snapshot(), vec![12, 14]);
/// assert_eq!(ring.onset_count(), 3);
/// assert!(ring.is_truncated());
/// ```
#[derive(Debug)]
pub struct ResultsRing {
    slots: Box<[AtomicI64]>,
    /// Onsets seen this session, including those past capacity
    onsets: AtomicUsize,
}

impl ResultsRing {
    /// Allocate a ring with `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| AtomicI64::new(0)).collect(),
            onsets: AtomicUsize::new(0),
        }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Record a latency in milliseconds
    ///
    /// Returns `false` when the ring was already full and the value was dropped.
    pub fn push(&self, latency_ms: i64) -> bool {
        let index = self.onsets.fetch_add(1, Ordering::AcqRel);
        match self.slots.get(index) {
            Some(slot) => {
                slot.store(latency_ms, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Zero every slot and the onset counter
    pub fn reset(&self) {
        for slot in self.slots.iter() {
            slot.store(0, Ordering::Release);
        }
        self.onsets.store(0, Ordering::Release);
    }

    /// Copy of all slots, always `capacity` long; unused slots read 0
    pub fn snapshot(&self) -> Vec<i64> {
        self.slots
            .iter()
            .map(|slot| slot.load(Ordering::Acquire))
            .collect()
    }

    /// Stored results only, in occurrence order
    pub fn recorded(&self) -> Vec<i64> {
        let stored = self.stored_count();
        self.slots[..stored]
            .iter()
            .map(|slot| slot.load(Ordering::Acquire))
            .collect()
    }

    /// Onsets counted this session, stored or not
    pub fn onset_count(&self) -> usize {
        self.onsets.load(Ordering::Acquire)
    }

    /// Number of occupied slots
    pub fn stored_count(&self) -> usize {
        self.onset_count().min(self.capacity())
    }

    /// Whether more onsets occurred than fit
    pub fn is_truncated(&self) -> bool {
        self.onset_count() > self.capacity()
    }
}
