//! Per-worker byte counters shared between transfer workers and the sampler.
//!
//! Each slot has exactly one writer (its worker) and one reader/resetter (the
//! sampler). Draining uses an atomic `swap(0)` per slot, so an increment lands
//! either in the interval being drained or in the next one, never in both.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::payload::{ProgressSink, ReportError};

/// Fixed-size array of byte counters, one per worker.
#[derive(Debug)]
pub struct CounterArray {
    slots: Box<[AtomicU64]>,
}

impl CounterArray {
    /// Allocate `len` counters, all zero.
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Add `bytes` to slot `index`. Out-of-range indices are ignored.
    pub fn add(&self, index: usize, bytes: u64) {
        if let Some(slot) = self.slots.get(index) {
            slot.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    /// Current value of slot `index` without resetting it.
    pub fn get(&self, index: usize) -> u64 {
        self.slots
            .get(index)
            .map(|slot| slot.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Sum of all slots without resetting them.
    pub fn sum(&self) -> u64 {
        self.slots.iter().map(|s| s.load(Ordering::Relaxed)).sum()
    }

    /// Sum all slots and reset each one to zero.
    pub fn drain(&self) -> u64 {
        self.slots
            .iter()
            .map(|slot| slot.swap(0, Ordering::AcqRel))
            .sum()
    }
}

/// A single counter slot, handed to one worker.
#[derive(Debug, Clone)]
pub struct CounterSlot {
    counters: Arc<CounterArray>,
    index: usize,
}

impl CounterSlot {
    pub fn new(counters: Arc<CounterArray>, index: usize) -> Self {
        Self { counters, index }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn add(&self, bytes: u64) {
        self.counters.add(self.index, bytes);
    }
}

impl ProgressSink for CounterSlot {
    fn record(&self, chunk_len: usize) -> Result<(), ReportError> {
        if self.index >= self.counters.len() {
            return Err(ReportError::new(format!(
                "counter slot {} out of range ({} slots)",
                self.index,
                self.counters.len()
            )));
        }
        self.add(chunk_len as u64);
        Ok(())
    }
}
