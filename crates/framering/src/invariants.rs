//! Debug assertion macros for ring invariants.
//!
//! Active only in debug builds (`debug_assert!`), so there is zero overhead
//! on the release hot path.

/// Assert that the write index only increases.
macro_rules! debug_assert_monotonic_idx {
    ($old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "write_idx decreased from {} to {}",
            $old,
            $new
        )
    };
}

/// Assert that a computed slot index is inside the ring.
macro_rules! debug_assert_slot_in_bounds {
    ($slot:expr, $capacity:expr) => {
        debug_assert!(
            $slot < $capacity,
            "slot {} outside ring of {} slots",
            $slot,
            $capacity
        )
    };
}

/// Assert that a window lies entirely within published frames.
macro_rules! debug_assert_window_published {
    ($end:expr, $write_idx:expr) => {
        debug_assert!(
            $end <= $write_idx,
            "window end {} past write_idx {}",
            $end,
            $write_idx
        )
    };
}

pub(crate) use debug_assert_monotonic_idx;
pub(crate) use debug_assert_slot_in_bounds;
pub(crate) use debug_assert_window_published;
