//! Shared memory layout of the frame ring.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  write_idx (8B atomic) │ padding to one cache line   (64 B)  │
//! ├──────────────────────────────────────────────────────────────┤
//! │  slot_0 : frame_bytes                                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ...                                                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  slot_{capacity-1} : frame_bytes                             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The header occupies exactly one cache line so it never shares a line with
//! slot 0. All multibyte fields are little-endian; the layout is only mapped
//! on little-endian hosts so native atomics read the on-wire value directly.

use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering};

/// Header size; also the offset of slot 0.
pub const RING_HEADER_BYTES: usize = 64;

/// Header at offset 0 of every ring region.
///
/// `write_idx` is the monotonically increasing count of published frames.
/// The producer stores it with `Release` after filling a slot; readers load
/// it with `Acquire` before touching slot bytes.
#[repr(C)]
pub struct RingHeader {
    write_idx: AtomicU64,
    _pad: [u8; RING_HEADER_BYTES - size_of::<AtomicU64>()],
}

const _: () = assert!(size_of::<RingHeader>() == RING_HEADER_BYTES);

impl RingHeader {
    /// Resets the write index. Only the creating producer calls this, before
    /// any reader can attach.
    pub(crate) fn init(&self) {
        self.write_idx.store(0, Ordering::Release);
    }

    /// Count of frames published so far.
    #[inline]
    pub fn write_idx(&self) -> u64 {
        self.write_idx.load(Ordering::Acquire)
    }

    /// Producer-side relaxed load; only the single producer stores this field.
    #[inline]
    pub(crate) fn write_idx_relaxed(&self) -> u64 {
        self.write_idx.load(Ordering::Relaxed)
    }

    /// Publishes a new write index. The `Release` store pairs with readers'
    /// `Acquire` loads so every slot byte written before this call is visible
    /// to a reader that observes the new index.
    #[inline]
    pub(crate) fn publish_idx(&self, new_idx: u64) {
        self.write_idx.store(new_idx, Ordering::Release);
    }
}

/// Total bytes a ring region occupies for the given geometry.
pub fn region_bytes(capacity: usize, frame_bytes: usize) -> usize {
    RING_HEADER_BYTES + capacity * frame_bytes
}
