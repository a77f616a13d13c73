//! Session wiring: one ring, one journal writer, one ingester, one plane.

use crate::ingester::{IngestConfig, Ingester};
use crate::sink::{FrameSinkBoxed, SinkError};
use framering::{
    CodecError, DataMode, Dtype, FrameCodec, FrameLayout, FramePublisher, FrameRing, FrameShape,
    MetricsPlane, RingConsumer, RingError, DEFAULT_LAG,
};
use framewal::{dump_loop, ControlFlags, DumpConfig, JournalConfig, JournalError, JournalWriter, StreamMeta};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Session startup and teardown errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session config: {0}")]
    Config(String),

    #[error(transparent)]
    Ring(#[from] RingError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

fn default_ring_name() -> String {
    "/sensor_ring".to_owned()
}
fn default_ring_capacity() -> usize {
    4096
}
fn default_lag() -> u64 {
    DEFAULT_LAG
}
fn default_poll_hz() -> f64 {
    400.0
}
fn default_rotate_frames() -> u64 {
    8192
}
fn default_batch_frames() -> usize {
    32
}
fn default_sleep_s() -> f64 {
    0.2
}

/// The enumerated configuration surface of a session.
///
/// Unknown keys are errors, not warnings; parameter combinations are
/// validated at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Frame layout family.
    pub data_mode: DataMode,
    /// Logical frame dimensions: `(N, C)` or `(H, W[, C])`.
    pub frame_shape: Vec<usize>,
    /// Element type name.
    pub dtype: Dtype,
    /// First journal file.
    pub file_a: PathBuf,
    /// Second journal file.
    pub file_b: PathBuf,
    /// OS-global ring name.
    #[serde(default = "default_ring_name")]
    pub ring_name: String,
    /// Ring slot count.
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
    /// Consumer/writer lag in frames.
    #[serde(default = "default_lag")]
    pub lag: u64,
    /// Journal writer poll rate.
    #[serde(default = "default_poll_hz")]
    pub poll_hz: f64,
    /// Records per journal file before rotation.
    #[serde(default = "default_rotate_frames")]
    pub rotate_frames: u64,
    /// Wall-clock rotation cap in seconds; `None` disables it.
    #[serde(default)]
    pub rotate_seconds: Option<f64>,
    /// Ingester batch size in frames.
    #[serde(default = "default_batch_frames")]
    pub batch_frames: usize,
    /// Ingester scan period in seconds.
    #[serde(default = "default_sleep_s")]
    pub sleep_s: f64,
    /// Wipe any existing journal at startup.
    #[serde(default)]
    pub overwrite: bool,
    /// Line-mode sink keys; empty means `c0..cN`.
    #[serde(default)]
    pub channel_keys: Vec<String>,
}

impl SessionConfig {
    pub fn new(
        data_mode: DataMode,
        frame_shape: Vec<usize>,
        dtype: Dtype,
        file_a: impl Into<PathBuf>,
        file_b: impl Into<PathBuf>,
    ) -> Self {
        Self {
            data_mode,
            frame_shape,
            dtype,
            file_a: file_a.into(),
            file_b: file_b.into(),
            ring_name: default_ring_name(),
            ring_capacity: default_ring_capacity(),
            lag: default_lag(),
            poll_hz: default_poll_hz(),
            rotate_frames: default_rotate_frames(),
            rotate_seconds: None,
            batch_frames: default_batch_frames(),
            sleep_s: default_sleep_s(),
            overwrite: false,
            channel_keys: Vec::new(),
        }
    }

    /// The canonical frame layout this config describes.
    pub fn layout(&self) -> Result<FrameLayout, CodecError> {
        let shape = FrameShape::from_dims(self.data_mode, &self.frame_shape)?;
        Ok(FrameLayout::new(shape, self.dtype))
    }

    /// Checks parameter combinations that cannot work at runtime.
    pub fn validate(&self) -> Result<FrameLayout, SessionError> {
        let layout = self
            .layout()
            .map_err(|e| SessionError::Config(e.to_string()))?;
        if layout.frame_bytes() == 0 {
            return Err(SessionError::Config("frame_shape has a zero axis".into()));
        }
        if self.ring_capacity == 0 {
            return Err(SessionError::Config("ring_capacity must be positive".into()));
        }
        if self.lag >= self.ring_capacity as u64 {
            return Err(SessionError::Config(format!(
                "lag {} must be smaller than ring_capacity {}",
                self.lag, self.ring_capacity
            )));
        }
        if self.poll_hz <= 0.0 {
            return Err(SessionError::Config("poll_hz must be positive".into()));
        }
        if self.sleep_s <= 0.0 {
            return Err(SessionError::Config("sleep_s must be positive".into()));
        }
        if self.file_a == self.file_b {
            return Err(SessionError::Config(
                "journal files a and b must differ".into(),
            ));
        }
        if layout.mode() == DataMode::Line
            && !self.channel_keys.is_empty()
            && self.channel_keys.len() != layout.shape.channels()
        {
            return Err(SessionError::Config(format!(
                "{} channel_keys for {} channels",
                self.channel_keys.len(),
                layout.shape.channels()
            )));
        }
        Ok(layout)
    }
}

/// A running data plane: the ring plus the writer and ingester tasks.
///
/// The session owns the created ring; dropping the session (after both tasks
/// released their handles) unlinks the OS object.
pub struct Session {
    ring: Arc<FrameRing>,
    layout: FrameLayout,
    lag: u64,
    plane: Arc<MetricsPlane>,
    control: Arc<ControlFlags>,
    writer_task: Option<JoinHandle<()>>,
    writer_shutdown: Option<oneshot::Sender<()>>,
    ingest_task: Option<JoinHandle<()>>,
    ingest_shutdown: Option<oneshot::Sender<()>>,
}

impl Session {
    /// Creates the ring and spawns the journal writer and ingester tasks.
    pub async fn start(
        config: SessionConfig,
        sink: Arc<dyn FrameSinkBoxed>,
    ) -> Result<Self, SessionError> {
        let layout = config.validate()?;
        let ring = Arc::new(FrameRing::create(
            &config.ring_name,
            config.ring_capacity,
            layout.frame_bytes(),
        )?);
        let plane = Arc::new(MetricsPlane::new());
        let control = Arc::new(ControlFlags::new());

        let journal_config = JournalConfig::new(&config.file_a, &config.file_b)
            .with_rotate_frames(config.rotate_frames)
            .with_rotate_seconds(config.rotate_seconds.map(Duration::from_secs_f64))
            .with_overwrite(config.overwrite);
        let writer = JournalWriter::open(
            &journal_config,
            StreamMeta::new(&config.ring_name, &layout),
            Arc::clone(&control),
            Arc::clone(&plane),
        )?;

        let (writer_shutdown, writer_rx) = oneshot::channel();
        let writer_task = tokio::spawn(dump_loop(
            Arc::clone(&ring),
            writer,
            Arc::clone(&plane),
            DumpConfig {
                poll_hz: config.poll_hz,
                lag: config.lag,
            },
            writer_rx,
        ));

        let ingest_config = IngestConfig::new(&config.file_a, &config.file_b)
            .with_channel_keys(config.channel_keys.clone())
            .with_batch_frames(config.batch_frames)
            .with_scan_interval(Duration::from_secs_f64(config.sleep_s));
        let ingester = Ingester::new(ingest_config, Arc::clone(&sink), Arc::clone(&plane));
        ingester.precreate(&layout).await?;

        let (ingest_shutdown, ingest_rx) = oneshot::channel();
        let ingest_task = tokio::spawn(ingester.run(ingest_rx));

        Ok(Self {
            ring,
            layout,
            lag: config.lag,
            plane,
            control,
            writer_task: Some(writer_task),
            writer_shutdown: Some(writer_shutdown),
            ingest_task: Some(ingest_task),
            ingest_shutdown: Some(ingest_shutdown),
        })
    }

    /// The shared ring.
    pub fn ring(&self) -> Arc<FrameRing> {
        Arc::clone(&self.ring)
    }

    /// The frame layout of this session.
    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    /// The shared metrics plane.
    pub fn metrics(&self) -> Arc<MetricsPlane> {
        Arc::clone(&self.plane)
    }

    /// Runtime control flags (force-rotate).
    pub fn control(&self) -> Arc<ControlFlags> {
        Arc::clone(&self.control)
    }

    /// Asks the journal writer to rotate at its next poll.
    pub fn force_rotate(&self) {
        self.control.request_force_rotate();
    }

    /// Publish handle for the producer.
    pub fn publisher(&self) -> Result<FramePublisher, RingError> {
        FramePublisher::new(
            Arc::clone(&self.ring),
            FrameCodec::new(self.layout),
            Arc::clone(&self.plane),
        )
    }

    /// Read cursor for a consumer, using the session lag.
    pub fn consumer(&self) -> Result<RingConsumer, RingError> {
        RingConsumer::new(Arc::clone(&self.ring), self.lag, self.ring.capacity())
    }

    /// Clean shutdown: the writer drains and seals, then the ingester drains
    /// the sealed files, then the ring is released (and unlinked once the
    /// last handle drops).
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.writer_shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.writer_task.take() {
            let _ = task.await;
        }
        if let Some(tx) = self.ingest_shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.ingest_task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // A session dropped without shutdown() must not leave detached tasks
        // holding the ring open.
        if let Some(task) = self.writer_task.take() {
            task.abort();
        }
        if let Some(task) = self.ingest_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> SessionConfig {
        SessionConfig::new(
            DataMode::Line,
            vec![4, 3],
            Dtype::F32,
            dir.join("stream_a.bin"),
            dir.join("stream_b.bin"),
        )
    }

    #[test]
    fn test_validate_accepts_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let layout = config(dir.path()).validate().unwrap();
        assert_eq!(layout.frame_bytes(), 48);
    }

    #[test]
    fn test_validate_rejects_bad_lag() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.ring_capacity = 8;
        cfg.lag = 8;
        assert!(matches!(cfg.validate(), Err(SessionError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_key_count_mismatch() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.channel_keys = vec!["a".into(), "b".into()];
        assert!(matches!(cfg.validate(), Err(SessionError::Config(_))));
    }

    #[test]
    fn test_unknown_config_keys_are_errors() {
        let json = serde_json::json!({
            "data_mode": "line",
            "frame_shape": [4, 3],
            "dtype": "float32",
            "file_a": "/tmp/a.bin",
            "file_b": "/tmp/b.bin",
            "frames_capacity": 1024,
        });
        let parsed: Result<SessionConfig, _> = serde_json::from_value(json);
        assert!(parsed.unwrap_err().to_string().contains("frames_capacity"));
    }

    #[test]
    fn test_image_shape_promotion_via_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.data_mode = DataMode::Image;
        cfg.frame_shape = vec![2, 3];
        cfg.dtype = Dtype::U8;
        let layout = cfg.validate().unwrap();
        assert_eq!(layout.shape.dims(), vec![2, 3, 1]);
        assert_eq!(layout.frame_bytes(), 6);
    }
}
