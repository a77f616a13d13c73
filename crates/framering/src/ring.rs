use crate::invariants::{debug_assert_monotonic_idx, debug_assert_slot_in_bounds};
use crate::layout::{region_bytes, RingHeader, RING_HEADER_BYTES};
use crate::shm::ShmRegion;
use crate::RingError;
use std::ptr;

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// This is a single-producer / multiple-consumer ring of fixed-size byte
// frames living in named shared memory. The only synchronization primitive
// is the 64-bit write index in the region header:
//
// **Producer (publish path):**
// 1. Load `write_idx` with Relaxed (only the producer stores it)
// 2. Memcpy the frame into slot `write_idx % capacity`
// 3. Store `write_idx + 1` with Release (publishes the slot bytes)
//
// **Consumers (view path):**
// 1. Load `write_idx` with Acquire (synchronizes with the producer's Release)
// 2. Read slot bytes for any window ending at or before that index
//
// A consumer that observes `write_idx = k` therefore observes every payload
// byte of frames with logical index < k. Nothing stops the producer from
// overwriting a slot while a lagging consumer still holds a view of it; the
// lag discipline in `RingConsumer` is what keeps readers outside the
// producer's overwrite window. There are no locks anywhere on this path.
//
// Sequence numbers are unbounded u64 (slot = idx % capacity), so index
// wrap-around is not a practical concern.
//
// =============================================================================

/// A contiguous run of slots, produced by [`FrameRing::window_segments`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSegment {
    /// Logical index of the first frame in the segment.
    pub start: u64,
    /// Number of frames in the segment.
    pub count: usize,
}

/// Single-producer shared-memory ring buffer of fixed-size byte frames.
///
/// Created once per session by the producer; any number of consumers attach
/// with [`FrameRing::open`] using the same geometry. The creating side owns
/// the OS object and unlinks it when dropped.
#[derive(Debug)]
pub struct FrameRing {
    region: ShmRegion,
    slots: *mut u8,
    capacity: usize,
    frame_bytes: usize,
}

// Safety: the region is shared bytes; all cross-thread (and cross-process)
// visibility is carried by the Release/Acquire protocol on `write_idx`.
unsafe impl Send for FrameRing {}
unsafe impl Sync for FrameRing {}

impl FrameRing {
    /// Allocates and initializes a new ring region under `name`.
    ///
    /// Replaces any stale region a hard-killed session left behind.
    pub fn create(name: &str, capacity: usize, frame_bytes: usize) -> Result<Self, RingError> {
        if capacity == 0 || frame_bytes == 0 {
            return Err(RingError::InvalidGeometry {
                capacity,
                frame_bytes,
            });
        }
        let region = ShmRegion::create(name, region_bytes(capacity, frame_bytes))?;
        let ring = Self::over(region, capacity, frame_bytes);
        ring.header().init();
        Ok(ring)
    }

    /// Attaches to an existing ring region.
    ///
    /// Fails with [`RingError::LayoutMismatch`] when the mapped size does not
    /// match the requested geometry.
    pub fn open(name: &str, capacity: usize, frame_bytes: usize) -> Result<Self, RingError> {
        if capacity == 0 || frame_bytes == 0 {
            return Err(RingError::InvalidGeometry {
                capacity,
                frame_bytes,
            });
        }
        let region = ShmRegion::open(name)?;
        let expected = region_bytes(capacity, frame_bytes);
        if region.len() != expected {
            return Err(RingError::LayoutMismatch {
                expected,
                mapped: region.len(),
            });
        }
        Ok(Self::over(region, capacity, frame_bytes))
    }

    fn over(region: ShmRegion, capacity: usize, frame_bytes: usize) -> Self {
        // SAFETY: the region is at least RING_HEADER_BYTES + capacity *
        // frame_bytes long (created that size, or verified in open()).
        let slots = unsafe { region.as_mut_ptr().add(RING_HEADER_BYTES) };
        Self {
            region,
            slots,
            capacity,
            frame_bytes,
        }
    }

    #[inline]
    fn header(&self) -> &RingHeader {
        // SAFETY: offset 0 of the region holds a RingHeader; the header type
        // is a single atomic plus padding, valid for any byte pattern.
        unsafe { &*self.region.as_ptr().cast::<RingHeader>() }
    }

    /// OS-global name of the ring region.
    pub fn name(&self) -> &str {
        self.region.name()
    }

    /// Slot count.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fixed byte size of every frame.
    #[inline]
    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Count of frames published so far (Acquire).
    #[inline]
    pub fn write_idx(&self) -> u64 {
        self.header().write_idx()
    }

    /// Slot holding the frame with the given logical index.
    #[inline]
    pub fn slot_of(&self, logical_idx: u64) -> usize {
        (logical_idx % self.capacity as u64) as usize
    }

    #[inline]
    fn slot_ptr(&self, slot: usize) -> *mut u8 {
        debug_assert_slot_in_bounds!(slot, self.capacity);
        // SAFETY: slot < capacity, so the offset stays inside the mapping.
        unsafe { self.slots.add(slot * self.frame_bytes) }
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Publishes one frame of exactly `frame_bytes` bytes.
    ///
    /// Returns the new write index. Never blocks.
    pub fn publish(&self, frame: &[u8]) -> Result<u64, RingError> {
        if frame.len() != self.frame_bytes {
            return Err(RingError::FrameSize {
                expected: self.frame_bytes,
                got: frame.len(),
            });
        }
        let wi = self.header().write_idx_relaxed();
        let slot = self.slot_of(wi);

        // SAFETY: the slot is inside the mapping and, by the single-producer
        // contract, nothing else writes it. Lag-respecting consumers do not
        // read slot `wi % capacity` until the index below is published.
        unsafe {
            ptr::copy_nonoverlapping(frame.as_ptr(), self.slot_ptr(slot), self.frame_bytes);
        }

        let new_idx = wi + 1;
        debug_assert_monotonic_idx!(wi, new_idx);
        self.header().publish_idx(new_idx);
        Ok(new_idx)
    }

    /// Publishes a batch of whole frames, equivalent to one [`publish`] per
    /// frame: the index advances once per frame, so readers observe a
    /// linearizable sequence of single publishes.
    ///
    /// An empty batch is a no-op and leaves the write index unchanged.
    ///
    /// [`publish`]: FrameRing::publish
    pub fn publish_all(&self, frames: &[u8]) -> Result<u64, RingError> {
        let tail = frames.len() % self.frame_bytes;
        if tail != 0 {
            return Err(RingError::FrameSize {
                expected: self.frame_bytes,
                got: tail,
            });
        }
        let mut idx = self.header().write_idx_relaxed();
        for frame in frames.chunks_exact(self.frame_bytes) {
            let slot = self.slot_of(idx);
            // SAFETY: as in publish(); each copy completes before the index
            // covering it is released below.
            unsafe {
                ptr::copy_nonoverlapping(frame.as_ptr(), self.slot_ptr(slot), self.frame_bytes);
            }
            idx += 1;
            self.header().publish_idx(idx);
        }
        Ok(idx)
    }

    // ---------------------------------------------------------------------
    // CONSUMER API
    // ---------------------------------------------------------------------

    /// Zero-copy view of `count` frames starting at `start`.
    ///
    /// Fails with [`RingError::WindowWraps`] when the window crosses the top
    /// slot; split it with [`window_segments`] and issue two views, or use
    /// [`copy_window`]. The bytes stay valid only while the producer does not
    /// lap into the viewed slots — the lag discipline is the caller's.
    ///
    /// [`window_segments`]: FrameRing::window_segments
    /// [`copy_window`]: FrameRing::copy_window
    pub fn view_window(&self, start: u64, count: usize) -> Result<&[u8], RingError> {
        if count == 0 {
            return Ok(&[]);
        }
        let wi = self.write_idx();
        let end = start + count as u64;
        if end > wi {
            return Err(RingError::WindowUnpublished { end, write_idx: wi });
        }
        let start_slot = self.slot_of(start);
        if start_slot + count > self.capacity {
            return Err(RingError::WindowWraps {
                start_slot,
                count,
                capacity: self.capacity,
            });
        }
        // SAFETY: the Acquire load of write_idx above synchronizes with the
        // producer's Release stores, so every byte of frames < wi is visible.
        // The range [start_slot, start_slot + count) stays inside the slots.
        unsafe {
            Ok(std::slice::from_raw_parts(
                self.slot_ptr(start_slot),
                count * self.frame_bytes,
            ))
        }
    }

    /// Splits a window into at most two contiguous slot runs.
    ///
    /// The second segment is present only when the window crosses the top
    /// slot; reading both in order yields the frames `start .. start+count`.
    pub fn window_segments(&self, start: u64, count: usize) -> (WindowSegment, Option<WindowSegment>) {
        let start_slot = self.slot_of(start);
        let first = count.min(self.capacity - start_slot);
        let head = WindowSegment {
            start,
            count: first,
        };
        let rest = count - first;
        let tail = (rest > 0).then(|| WindowSegment {
            start: start + first as u64,
            count: rest,
        });
        (head, tail)
    }

    /// Copies a window (wrapping or not) into `out`, replacing its contents.
    ///
    /// Copy-and-return fallback for callers that cannot hold a split borrow.
    pub fn copy_window(&self, start: u64, count: usize, out: &mut Vec<u8>) -> Result<(), RingError> {
        out.clear();
        out.reserve(count * self.frame_bytes);
        let (head, tail) = self.window_segments(start, count);
        out.extend_from_slice(self.view_window(head.start, head.count)?);
        if let Some(seg) = tail {
            out.extend_from_slice(self.view_window(seg.start, seg.count)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("/framering_ring_{tag}_{}", std::process::id())
    }

    fn frame(fill: u8, len: usize) -> Vec<u8> {
        vec![fill; len]
    }

    #[test]
    fn test_publish_and_view() {
        let ring = FrameRing::create(&unique_name("basic"), 8, 4).unwrap();
        assert_eq!(ring.write_idx(), 0);

        ring.publish(&frame(1, 4)).unwrap();
        ring.publish(&frame(2, 4)).unwrap();
        assert_eq!(ring.write_idx(), 2);

        let view = ring.view_window(0, 2).unwrap();
        assert_eq!(view, [1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn test_publish_rejects_wrong_size() {
        let ring = FrameRing::create(&unique_name("size"), 8, 4).unwrap();
        let err = ring.publish(&frame(0, 3)).unwrap_err();
        assert!(matches!(err, RingError::FrameSize { expected: 4, got: 3 }));
        assert_eq!(ring.write_idx(), 0);
    }

    #[test]
    fn test_publish_all_empty_is_noop() {
        let ring = FrameRing::create(&unique_name("empty"), 8, 4).unwrap();
        ring.publish(&frame(9, 4)).unwrap();
        let idx = ring.publish_all(&[]).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(ring.write_idx(), 1);
    }

    #[test]
    fn test_open_checks_layout() {
        let name = unique_name("layout");
        let _ring = FrameRing::create(&name, 8, 4).unwrap();
        let err = FrameRing::open(&name, 8, 16).unwrap_err();
        assert!(matches!(err, RingError::LayoutMismatch { .. }));
        assert!(FrameRing::open(&name, 8, 4).is_ok());
    }

    #[test]
    fn test_open_sees_published_frames() {
        let name = unique_name("attach");
        let ring = FrameRing::create(&name, 8, 4).unwrap();
        ring.publish(&frame(7, 4)).unwrap();

        let reader = FrameRing::open(&name, 8, 4).unwrap();
        assert_eq!(reader.write_idx(), 1);
        assert_eq!(reader.view_window(0, 1).unwrap(), [7, 7, 7, 7]);
    }

    #[test]
    fn test_wrap_needs_two_segments() {
        let ring = FrameRing::create(&unique_name("wrap"), 8, 4).unwrap();
        for k in 0..12u8 {
            ring.publish(&frame(k, 4)).unwrap();
        }

        // Frames 5..11 occupy slots 5,6,7,0,1,2.
        assert!(matches!(
            ring.view_window(5, 6),
            Err(RingError::WindowWraps { start_slot: 5, count: 6, capacity: 8 })
        ));

        let (head, tail) = ring.window_segments(5, 6);
        assert_eq!(head, WindowSegment { start: 5, count: 3 });
        assert_eq!(tail, Some(WindowSegment { start: 8, count: 3 }));

        let mut split = Vec::new();
        split.extend_from_slice(ring.view_window(head.start, head.count).unwrap());
        let seg = tail.unwrap();
        split.extend_from_slice(ring.view_window(seg.start, seg.count).unwrap());

        let mut copied = Vec::new();
        ring.copy_window(5, 6, &mut copied).unwrap();
        assert_eq!(split, copied);

        let expected: Vec<u8> = (5..11u8).flat_map(|k| vec![k; 4]).collect();
        assert_eq!(copied, expected);
    }

    #[test]
    fn test_view_past_write_idx_fails() {
        let ring = FrameRing::create(&unique_name("ahead"), 8, 4).unwrap();
        ring.publish(&frame(0, 4)).unwrap();
        assert!(matches!(
            ring.view_window(0, 2),
            Err(RingError::WindowUnpublished { end: 2, write_idx: 1 })
        ));
    }

    #[test]
    fn test_publish_all_batches() {
        let ring = FrameRing::create(&unique_name("batch"), 8, 2).unwrap();
        let bytes: Vec<u8> = (0..10).collect();
        let idx = ring.publish_all(&bytes).unwrap();
        assert_eq!(idx, 5);
        assert_eq!(ring.view_window(0, 5).unwrap(), bytes.as_slice());

        let err = ring.publish_all(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, RingError::FrameSize { expected: 2, got: 1 }));
    }
}
