//! framering - Shared-Memory Sensor Frame Ring
//!
//! A single-producer / multiple-consumer ring buffer of fixed-size byte
//! frames living in POSIX named shared memory, plus the codec that maps
//! sensor-natural array shapes onto the canonical frame layout and the
//! metrics plane every actor of the data plane publishes into.
//!
//! The producer publishes whole frames; consumers take zero-copy window
//! views and stay a configurable lag behind the write index so the producer
//! never overwrites a slot mid-read. The only synchronization is a single
//! release/acquire atomic write index — no locks on the hot path.
//!
//! # Example
//!
//! ```no_run
//! use framering::{FrameRing, RingConsumer};
//! use std::sync::Arc;
//!
//! // Producer side: 4096 slots of 48-byte frames.
//! let ring = Arc::new(FrameRing::create("/sensor_ring", 4096, 48)?);
//! ring.publish(&[0u8; 48])?;
//!
//! // Consumer side (same or another process).
//! let reader = Arc::new(FrameRing::open("/sensor_ring", 4096, 48)?);
//! let mut consumer = RingConsumer::with_default_lag(reader)?;
//! if let Some(window) = consumer.poll() {
//!     let bytes = consumer.ring().view_window(window.start, window.count)?;
//!     // render / forward bytes ...
//! }
//! # Ok::<(), framering::RingError>(())
//! ```

pub mod codec;
mod consumer;
mod error;
mod invariants;
mod layout;
mod ring;
mod shm;
pub mod source;
pub mod telemetry;

pub use codec::{
    sample_bytes, samples_from_bytes, DataMode, Dtype, FrameCodec, FrameLayout, FrameShape,
    Sample, TypedWindow,
};
pub use consumer::{ReadWindow, RingConsumer, DEFAULT_LAG};
pub use error::{CodecError, PublishError, RingError};
pub use layout::{region_bytes, RingHeader, RING_HEADER_BYTES};
pub use ring::{FrameRing, WindowSegment};
pub use shm::ShmRegion;
pub use source::{FramePublisher, FrameSource, SourceBlock};
pub use telemetry::{Actor, MetricsPlane, MetricsSnapshot, RollingTimings, Stopwatch};
