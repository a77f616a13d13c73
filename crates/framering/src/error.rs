//! Error types for ring and codec operations.

use crate::codec::Dtype;
use std::io;
use thiserror::Error;

/// Errors raised by ring creation, attachment and the publish/view protocol.
#[derive(Debug, Error)]
pub enum RingError {
    /// Shared-memory syscall failure (shm_open, ftruncate, mmap).
    #[error("shared memory error: {0}")]
    Io(#[from] io::Error),

    /// Attached region size disagrees with the requested layout.
    #[error("ring layout mismatch: region is {mapped} bytes, layout needs {expected}")]
    LayoutMismatch {
        /// Bytes the requested capacity and frame size would occupy.
        expected: usize,
        /// Bytes actually mapped.
        mapped: usize,
    },

    /// Ring parameters that cannot describe a ring.
    #[error("invalid ring geometry: capacity={capacity}, frame_bytes={frame_bytes}")]
    InvalidGeometry { capacity: usize, frame_bytes: usize },

    /// Consumer lag must leave at least one readable slot.
    #[error("lag {lag} must be smaller than capacity {capacity}")]
    InvalidLag { lag: u64, capacity: usize },

    /// Payload length is not the ring's frame size (or a whole multiple for batches).
    #[error("frame payload is {got} bytes, ring frames are {expected}")]
    FrameSize { expected: usize, got: usize },

    /// Requested window extends past the current write index.
    #[error("window ends at frame {end} but only {write_idx} frames are published")]
    WindowUnpublished { end: u64, write_idx: u64 },

    /// Window crosses the top slot; issue two views via `window_segments`.
    #[error("window of {count} frames starting at slot {start_slot} wraps a {capacity}-slot ring")]
    WindowWraps {
        start_slot: usize,
        count: usize,
        capacity: usize,
    },
}

/// Errors raised while reshaping producer arrays to frames, or frames to views.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Input array shape cannot be normalized to the configured frame layout.
    #[error("array shape {got:?} does not fit frame layout {expected:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    /// Element type disagrees with the configured dtype.
    #[error("element type {got} does not match configured dtype {expected}")]
    DtypeMismatch { expected: Dtype, got: Dtype },

    /// Byte window is not a whole number of frames.
    #[error("{len} bytes is not a whole number of {frame_bytes}-byte frames")]
    PartialFrame { len: usize, frame_bytes: usize },

    /// Channel index outside the layout's channel count.
    #[error("channel {channel} out of range for {channels} channels")]
    ChannelOutOfRange { channel: usize, channels: usize },
}

/// Either half of the publish path can fail: normalization or the ring.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Ring(#[from] RingError),
}
