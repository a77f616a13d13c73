//! framewal - Rotating Binary Journal for Sensor Frames
//!
//! Persists every frame published on a [`framering::FrameRing`] to one of
//! two alternating append-only files, in frame order. Finished files are
//! handed to the ingester through zero-byte seal sentinels: the writer
//! creates a seal at rotation, the ingester removes it after draining, and
//! neither side ever touches a file the other owns.
//!
//! The [`dump_loop`] task polls the ring at a fixed rate and tolerates both
//! I/O errors (backoff + retry, surfaced on the metrics plane) and being
//! lapped by the producer (the gap is counted as loss, never silently
//! dropped).

mod dump;
mod error;
pub mod format;
mod sealed;
mod writer;

pub use dump::{dump_loop, DumpConfig};
pub use error::{HeaderError, JournalError};
pub use format::{
    encode_header, read_header, seal_path, truncate_to_header, FileHeader, RecordHeader,
    StreamMeta, FORMAT_VERSION, MAGIC, RECORD_HEADER_BYTES,
};
pub use sealed::{Record, SealedReader};
pub use writer::{ControlFlags, JournalConfig, JournalWriter};
