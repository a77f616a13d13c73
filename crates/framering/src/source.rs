//! Producer boundary: acquisition sources and the publish handle.

use crate::codec::{DataMode, FrameCodec, Sample};
use crate::consumer::DEFAULT_LAG;
use crate::ring::FrameRing;
use crate::telemetry::{Actor, MetricsPlane, RollingTimings, Stopwatch};
use crate::{CodecError, PublishError, RingError};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One acquisition from a sensor: a flat element buffer plus its logical
/// dimensions, in whatever orientation the device delivers.
#[derive(Debug, Clone)]
pub struct SourceBlock<T> {
    pub data: Vec<T>,
    pub dims: Vec<usize>,
}

impl<T> SourceBlock<T> {
    pub fn new(data: Vec<T>, dims: Vec<usize>) -> Self {
        Self { data, dims }
    }
}

/// A sensor acquisition producer.
///
/// Implementations block on the device; `Ok(None)` ends the stream. The
/// serial and camera drivers behind this trait live outside this workspace.
pub trait FrameSource: Send {
    type Elem: Sample;

    /// Blocks until the next acquisition is available.
    fn next_block(&mut self) -> io::Result<Option<SourceBlock<Self::Elem>>>;
}

/// Producer-side handle tying a codec, a ring and the metrics plane.
///
/// Each publish is timed; rates and the producer heartbeat are pushed to the
/// plane at 1 Hz.
pub struct FramePublisher {
    ring: Arc<FrameRing>,
    codec: FrameCodec,
    plane: Arc<MetricsPlane>,
    timings: RollingTimings,
    last_report: Instant,
}

impl FramePublisher {
    /// Ties a codec to a ring. Fails when the codec's frame size disagrees
    /// with the ring's.
    pub fn new(
        ring: Arc<FrameRing>,
        codec: FrameCodec,
        plane: Arc<MetricsPlane>,
    ) -> Result<Self, RingError> {
        if codec.layout().frame_bytes() != ring.frame_bytes() {
            return Err(RingError::FrameSize {
                expected: ring.frame_bytes(),
                got: codec.layout().frame_bytes(),
            });
        }
        Ok(Self {
            ring,
            codec,
            plane,
            timings: RollingTimings::default(),
            last_report: Instant::now(),
        })
    }

    pub fn ring(&self) -> &Arc<FrameRing> {
        &self.ring
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    /// Recommended consumer lag for this ring.
    pub fn default_lag(&self) -> u64 {
        DEFAULT_LAG
    }

    /// Normalizes and publishes one acquisition block; returns the new write
    /// index. Never blocks.
    pub fn publish_block<T: Sample>(&mut self, block: &SourceBlock<T>) -> Result<u64, PublishError> {
        let sw = Stopwatch::start();
        let bytes = match (self.codec.layout().mode(), block.dims.as_slice()) {
            (DataMode::Line, &[rows, cols]) => self.codec.encode_line(&block.data, (rows, cols))?,
            (DataMode::Line, &[batch, rows, cols]) => {
                self.codec.encode_line_batch(&block.data, (batch, rows, cols))?
            }
            (DataMode::Line, dims) => {
                return Err(PublishError::Codec(CodecError::ShapeMismatch {
                    expected: self.codec.layout().shape.dims(),
                    got: dims.to_vec(),
                }))
            }
            (DataMode::Image, dims) => self.codec.encode_image(&block.data, dims)?,
        };
        let idx = self.ring.publish_all(&bytes)?;

        self.timings.note(sw.elapsed_ms());
        self.plane.set_last_write_idx(idx);
        if self.last_report.elapsed() >= Duration::from_secs(1) {
            self.report();
        }
        Ok(idx)
    }

    /// Pushes the rolled-up rates and heartbeat to the plane now.
    pub fn report(&mut self) {
        self.plane.set_producer_rates(
            self.timings.fps(),
            self.timings.avg_ms(),
            self.timings.p95_ms(),
        );
        self.plane.heartbeat(Actor::Producer);
        self.last_report = Instant::now();
    }
}
