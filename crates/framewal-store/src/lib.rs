//! framewal-store - Durable Sink and Ingester for the Frame Data Plane
//!
//! The last stage of the pipeline: sealed journal files are drained into a
//! keyed durable store. The [`FrameSink`] trait is the store boundary (line
//! mode: one key per channel plus `time`; image mode: `image` plus an
//! `image_shape` sidecar); the [`Ingester`] owns the seal protocol with the
//! journal writer; [`Session`] composes ring + writer + ingester + metrics
//! into one running data plane.
//!
//! ```no_run
//! use framewal_store::{MemorySink, Session, SessionConfig};
//! use framering::{DataMode, Dtype};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), framewal_store::SessionError> {
//! let config = SessionConfig::new(
//!     DataMode::Line,
//!     vec![4, 3],
//!     Dtype::F32,
//!     "/tmp/stream_a.bin",
//!     "/tmp/stream_b.bin",
//! );
//! let sink = Arc::new(MemorySink::new());
//! let session = Session::start(config, sink).await?;
//!
//! let mut publisher = session.publisher()?;
//! // publisher.publish_block(...) from the acquisition loop ...
//!
//! session.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod ingester;
mod session;
mod sink;

pub use ingester::{IngestConfig, IngestError, Ingester, ScanReport};
pub use session::{Session, SessionConfig, SessionError};
pub use sink::{
    FrameSink, FrameSinkBoxed, JsonFileSink, MemorySink, NullSink, SampleBlock, SinkError,
};
