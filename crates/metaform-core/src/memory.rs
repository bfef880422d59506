//! Memory - Explicit Allocation Accounting
//!
//! `MemoryTracker` is a context object handed to the components that want
//! their allocations accounted (the autograd graph records every stored
//! value and gradient). There is no process-wide registry: two trackers never
//! observe each other's allocations.
//!
//! @version 0.1.0
//! @author Metaform Development Team

use std::sync::atomic::{AtomicUsize, Ordering};

// =============================================================================
// Memory Snapshot
// =============================================================================

/// A point-in-time copy of a tracker's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemorySnapshot {
    /// Bytes currently accounted as live.
    pub bytes_in_use: usize,
    /// Highest value `bytes_in_use` has reached.
    pub peak_bytes: usize,
    /// Number of allocations recorded since creation or the last reset.
    pub allocations: usize,
    /// Number of frees recorded since creation or the last reset.
    pub frees: usize,
}

// =============================================================================
// Memory Tracker
// =============================================================================

/// Tracks live and peak bytes for the components that share it.
///
/// Counters are atomic so a tracker can be shared behind an `Arc` between
/// a graph and the code inspecting it.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    in_use: AtomicUsize,
    peak: AtomicUsize,
    allocations: AtomicUsize,
    frees: AtomicUsize,
}

impl MemoryTracker {
    /// Creates a tracker with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an allocation of `bytes`.
    pub fn record_alloc(&self, bytes: usize) {
        let now = self.in_use.fetch_add(bytes, Ordering::SeqCst) + bytes;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.allocations.fetch_add(1, Ordering::SeqCst);
    }

    /// Records that `bytes` previously recorded were released.
    ///
    /// Saturates at zero rather than wrapping.
    pub fn record_free(&self, bytes: usize) {
        let _ = self
            .in_use
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                Some(cur.saturating_sub(bytes))
            });
        self.frees.fetch_add(1, Ordering::SeqCst);
    }

    /// Bytes currently live.
    pub fn bytes_in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Highest number of live bytes observed.
    pub fn peak_bytes(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Returns all counters at once.
    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            bytes_in_use: self.bytes_in_use(),
            peak_bytes: self.peak_bytes(),
            allocations: self.allocations.load(Ordering::SeqCst),
            frees: self.frees.load(Ordering::SeqCst),
        }
    }

    /// Resets the peak to the current live size.
    pub fn reset_peak(&self) {
        self.peak.store(self.bytes_in_use(), Ordering::SeqCst);
    }
}

// =============================================================================
// Tests
// =============================================================================
