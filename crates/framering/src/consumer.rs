//! Consumer-side read discipline: lag, skip-ahead and drop accounting.

use crate::invariants::debug_assert_window_published;
use crate::ring::FrameRing;
use crate::RingError;
use std::sync::Arc;

/// Default number of freshest frames a consumer leaves unread so the
/// producer cannot overwrite a slot mid-view.
pub const DEFAULT_LAG: u64 = 16;

/// A window of frames the consumer may read now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadWindow {
    /// Logical index of the first readable frame.
    pub start: u64,
    /// Number of frames in the window.
    pub count: usize,
}

/// Cursor over a [`FrameRing`] for one consumer.
///
/// Each poll reads at `write_idx - lag`; a backlog larger than `max_window`
/// is skipped rather than chased, and the skipped frames are counted into
/// `drops_est`. Falling behind is reported, never raised.
pub struct RingConsumer {
    ring: Arc<FrameRing>,
    lag: u64,
    max_window: usize,
    next_read_idx: u64,
    prev_write_idx: u64,
    drops_est: u64,
}

impl RingConsumer {
    /// Creates a cursor with the given lag and catch-up cap.
    ///
    /// The lag must leave at least one readable slot (`lag < capacity`).
    pub fn new(ring: Arc<FrameRing>, lag: u64, max_window: usize) -> Result<Self, RingError> {
        if lag >= ring.capacity() as u64 {
            return Err(RingError::InvalidLag {
                lag,
                capacity: ring.capacity(),
            });
        }
        // Tail-follow: start at the current write position.
        let write_idx = ring.write_idx();
        Ok(Self {
            ring,
            lag,
            max_window: max_window.max(1),
            next_read_idx: write_idx.saturating_sub(lag),
            prev_write_idx: write_idx,
            drops_est: 0,
        })
    }

    /// Cursor with [`DEFAULT_LAG`] and a whole-ring catch-up cap.
    pub fn with_default_lag(ring: Arc<FrameRing>) -> Result<Self, RingError> {
        let max_window = ring.capacity();
        Self::new(ring, DEFAULT_LAG, max_window)
    }

    /// The ring this cursor reads.
    pub fn ring(&self) -> &FrameRing {
        &self.ring
    }

    /// Estimated frames this consumer never saw.
    pub fn drops_est(&self) -> u64 {
        self.drops_est
    }

    /// Frames between the cursor and the current write index.
    pub fn frames_lag(&self) -> u64 {
        self.ring.write_idx().saturating_sub(self.next_read_idx)
    }

    /// Returns the next readable window, or `None` when caught up.
    ///
    /// The returned window is safe against producer overwrite as long as it
    /// is consumed before the producer publishes another `lag` frames.
    pub fn poll(&mut self) -> Option<ReadWindow> {
        let wi = self.ring.write_idx();
        let end = wi.saturating_sub(self.lag);
        if end <= self.next_read_idx {
            self.note_tick(wi, 0);
            return None;
        }

        let avail = end - self.next_read_idx;
        let count = avail.min(self.max_window as u64);
        // Skip-ahead: a backlog beyond the cap is abandoned, not chased.
        let start = end - count;
        debug_assert_window_published!(start + count, wi);

        self.note_tick(wi, count);
        self.next_read_idx = start + count;
        Some(ReadWindow {
            start,
            count: count as usize,
        })
    }

    /// Folds the writer's advance since the previous tick into the drop
    /// estimate: whatever advanced beyond what we consumed is a drop at
    /// this consumer's rate.
    fn note_tick(&mut self, write_idx_now: u64, consumed: u64) {
        let advanced = write_idx_now.saturating_sub(self.prev_write_idx);
        self.drops_est += advanced.saturating_sub(consumed);
        self.prev_write_idx = write_idx_now;
    }
}
