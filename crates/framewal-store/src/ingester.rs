//! Seal-driven drain of journal files into the durable sink.
//!
//! The ingester polls both journal paths at a much lower rate than the
//! writer. A seal beside a file means the writer is done with it: the
//! ingester reads every whole record, appends per-key batches to the sink,
//! truncates the file back to its header and removes the seal. A missing
//! seal is never an error — the writer still owns that file.

use crate::sink::{FrameSinkBoxed, SampleBlock, SinkError};
use framering::{Actor, CodecError, DataMode, Dtype, FrameCodec, FrameLayout, MetricsPlane};
use framewal::{seal_path, truncate_to_header, JournalError, SealedReader, RECORD_HEADER_BYTES};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;

/// Backoff after a failed scan before the next one.
const ERROR_BACKOFF: Duration = Duration::from_millis(200);

/// Errors of one file drain.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("ingest I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Ingester tuning.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub file_a: PathBuf,
    pub file_b: PathBuf,
    /// Per-channel sink keys for line mode; empty means `c0..cN`.
    pub channel_keys: Vec<String>,
    /// Frames accumulated per key before a flush.
    pub batch_frames: usize,
    /// Pause between scans of the two journal paths.
    pub scan_interval: Duration,
}

impl IngestConfig {
    pub fn new(file_a: impl Into<PathBuf>, file_b: impl Into<PathBuf>) -> Self {
        Self {
            file_a: file_a.into(),
            file_b: file_b.into(),
            channel_keys: Vec::new(),
            batch_frames: 32,
            scan_interval: Duration::from_millis(200),
        }
    }

    pub fn with_channel_keys(mut self, keys: Vec<String>) -> Self {
        self.channel_keys = keys;
        self
    }

    pub fn with_batch_frames(mut self, frames: usize) -> Self {
        self.batch_frames = frames.max(1);
        self
    }

    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }
}

/// Outcome of one scan over both journal paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Sealed files drained and truncated.
    pub drained: usize,
    /// Sealed files that failed and were left in place.
    pub failed: usize,
}

/// Drains sealed journal files into a [`FrameSinkBoxed`].
pub struct Ingester {
    config: IngestConfig,
    sink: Arc<dyn FrameSinkBoxed>,
    plane: Arc<MetricsPlane>,
}

impl Ingester {
    pub fn new(
        config: IngestConfig,
        sink: Arc<dyn FrameSinkBoxed>,
        plane: Arc<MetricsPlane>,
    ) -> Self {
        Self {
            config,
            sink,
            plane,
        }
    }

    fn line_keys(&self, channels: usize) -> Vec<String> {
        if self.config.channel_keys.len() == channels {
            self.config.channel_keys.clone()
        } else {
            (0..channels).map(|c| format!("c{c}")).collect()
        }
    }

    /// Creates the sink keys for `layout` before the first seal arrives, so
    /// readers find them even on an idle stream.
    pub async fn precreate(&self, layout: &FrameLayout) -> Result<(), SinkError> {
        match layout.mode() {
            DataMode::Line => {
                for key in self.line_keys(layout.shape.channels()) {
                    self.sink.ensure_key_boxed(&key, layout.dtype).await?;
                }
                self.sink.ensure_key_boxed("time", Dtype::F64).await?;
            }
            DataMode::Image => {
                self.sink.ensure_key_boxed("image", layout.dtype).await?;
                self.sink
                    .put_meta_boxed("image_shape", serde_json::json!(layout.shape.dims()))
                    .await?;
            }
        }
        Ok(())
    }

    /// Scans both journal paths once; drains any sealed file.
    pub async fn scan_once(&self) -> ScanReport {
        let files = [self.config.file_a.clone(), self.config.file_b.clone()];
        let mut report = ScanReport::default();
        for path in &files {
            if !seal_path(path).exists() {
                continue;
            }
            match self.drain_file(path).await {
                Ok(()) => {
                    self.plane.ingest_add_file();
                    report.drained += 1;
                }
                Err(e) => {
                    // A malformed file is skipped, not fatal; the error stays
                    // visible on the plane until the next success.
                    tracing::warn!(path = %path.display(), error = %e, "journal drain failed");
                    self.plane.set_ingest_error(format!("{e} on {}", path.display()));
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Reads every whole record of a sealed file, appends batches to the
    /// sink, truncates the file back to its header and removes the seal.
    async fn drain_file(&self, path: &Path) -> Result<(), IngestError> {
        let mut reader = SealedReader::open(path)?;
        let layout = reader.header().meta.layout().map_err(JournalError::Header)?;
        let codec = FrameCodec::new(layout);

        match layout.mode() {
            DataMode::Line => self.drain_line(&mut reader, &codec).await?,
            DataMode::Image => self.drain_image(&mut reader, &layout).await?,
        }

        let raw_header = reader.header().raw.clone();
        drop(reader);
        truncate_to_header(path, &raw_header)?;
        let _ = std::fs::remove_file(seal_path(path));
        Ok(())
    }

    async fn drain_line(
        &self,
        reader: &mut SealedReader,
        codec: &FrameCodec,
    ) -> Result<(), IngestError> {
        let layout = *codec.layout();
        let channels = layout.shape.channels();
        let keys = self.line_keys(channels);

        for key in &keys {
            self.sink.ensure_key_boxed(key, layout.dtype).await?;
        }
        self.sink.ensure_key_boxed("time", Dtype::F64).await?;

        let mut acc: Vec<Vec<u8>> = vec![Vec::new(); channels];
        let mut times: Vec<u8> = Vec::new();
        let mut batch_start: u64 = 0;
        let mut in_batch = 0usize;
        let mut frames = 0u64;
        let mut bytes_read = 0u64;
        let mut batches = 0u64;

        while let Some(record) = reader.next_record()? {
            if in_batch == 0 {
                batch_start = record.logical_idx;
            }
            for (c, slot) in acc.iter_mut().enumerate() {
                slot.extend_from_slice(&codec.line_channel_bytes(&record.payload, c)?);
            }
            times.extend_from_slice(&(record.ts_ns as f64 / 1e9).to_le_bytes());
            in_batch += 1;
            frames += 1;
            bytes_read += (RECORD_HEADER_BYTES + record.payload.len()) as u64;

            if in_batch >= self.config.batch_frames {
                self.flush_line(&keys, &mut acc, &mut times, batch_start, layout.dtype)
                    .await?;
                in_batch = 0;
                batches += 1;
            }
        }
        if in_batch > 0 {
            self.flush_line(&keys, &mut acc, &mut times, batch_start, layout.dtype)
                .await?;
            batches += 1;
        }

        self.plane.ingest_add(frames, bytes_read, batches);
        Ok(())
    }

    async fn flush_line(
        &self,
        keys: &[String],
        acc: &mut [Vec<u8>],
        times: &mut Vec<u8>,
        batch_start: u64,
        dtype: Dtype,
    ) -> Result<(), IngestError> {
        for (key, slot) in keys.iter().zip(acc.iter_mut()) {
            if slot.is_empty() {
                continue;
            }
            let block = SampleBlock::new(dtype, batch_start, std::mem::take(slot));
            self.sink.append_boxed(key, block).await?;
        }
        if !times.is_empty() {
            let block = SampleBlock::new(Dtype::F64, batch_start, std::mem::take(times));
            self.sink.append_boxed("time", block).await?;
        }
        Ok(())
    }

    async fn drain_image(
        &self,
        reader: &mut SealedReader,
        layout: &FrameLayout,
    ) -> Result<(), IngestError> {
        self.sink.ensure_key_boxed("image", layout.dtype).await?;
        self.sink
            .put_meta_boxed("image_shape", serde_json::json!(layout.shape.dims()))
            .await?;

        let mut acc: Vec<u8> = Vec::new();
        let mut batch_start: u64 = 0;
        let mut in_batch = 0usize;
        let mut frames = 0u64;
        let mut bytes_read = 0u64;
        let mut batches = 0u64;

        while let Some(record) = reader.next_record()? {
            if in_batch == 0 {
                batch_start = record.logical_idx;
            }
            acc.extend_from_slice(&record.payload);
            in_batch += 1;
            frames += 1;
            bytes_read += (RECORD_HEADER_BYTES + record.payload.len()) as u64;

            if in_batch >= self.config.batch_frames {
                let block = SampleBlock::new(layout.dtype, batch_start, std::mem::take(&mut acc));
                self.sink.append_boxed("image", block).await?;
                in_batch = 0;
                batches += 1;
            }
        }
        if in_batch > 0 {
            let block = SampleBlock::new(layout.dtype, batch_start, std::mem::take(&mut acc));
            self.sink.append_boxed("image", block).await?;
            batches += 1;
        }

        self.plane.ingest_add(frames, bytes_read, batches);
        Ok(())
    }

    /// Scan loop: runs until `shutdown` fires, then drains any remaining
    /// sealed files and exits.
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        self.plane.set_ingest_alive(true);
        self.plane.heartbeat(Actor::Ingester);

        let mut last_frames = self.plane.ingest_frames_ingested();
        let mut last_report = Instant::now();

        loop {
            tokio::select! {
                () = tokio::time::sleep(self.config.scan_interval) => {
                    let report = self.scan_once().await;
                    if report.failed > 0 {
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }

                    if last_report.elapsed() >= Duration::from_secs(1) {
                        let total = self.plane.ingest_frames_ingested();
                        let fps = (total - last_frames) as f64 / last_report.elapsed().as_secs_f64();
                        self.plane.set_ingest_fps(fps);
                        self.plane.heartbeat(Actor::Ingester);
                        last_frames = total;
                        last_report = Instant::now();
                    }
                }
                _ = &mut shutdown => {
                    // Drain whatever the writer sealed on its way out.
                    let _ = self.scan_once().await;
                    self.plane.set_ingest_alive(false);
                    self.plane.heartbeat(Actor::Ingester);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use framewal::{encode_header, RecordHeader, StreamMeta};
    use framering::FrameShape;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn line_layout() -> FrameLayout {
        FrameLayout::new(
            FrameShape::Line {
                samples: 2,
                channels: 2,
            },
            Dtype::F32,
        )
    }

    /// Writes a sealed journal holding `frames` records of the shared test
    /// pattern and returns its path.
    fn sealed_journal(dir: &TempDir, name: &str, layout: &FrameLayout, frames: u64) -> PathBuf {
        let path = dir.path().join(name);
        let meta = StreamMeta::new("/test_ring", layout);
        let mut bytes = encode_header(&meta).unwrap();
        for k in 0..frames {
            bytes.extend_from_slice(
                &RecordHeader {
                    ts_ns: 1_000_000_000 + k,
                    logical_idx: k,
                }
                .encode(),
            );
            for n in 0..2u32 {
                for c in 0..2u32 {
                    let v = 100.0 * k as f32 + 10.0 * n as f32 + c as f32;
                    bytes.extend_from_slice(&v.to_le_bytes());
                }
            }
        }
        File::create(&path).unwrap().write_all(&bytes).unwrap();
        File::create(seal_path(&path)).unwrap();
        path
    }

    fn ingester(dir: &TempDir, sink: Arc<MemorySink>) -> Ingester {
        let config = IngestConfig::new(
            dir.path().join("stream_a.bin"),
            dir.path().join("stream_b.bin"),
        )
        .with_batch_frames(3);
        Ingester::new(config, sink, Arc::new(MetricsPlane::new()))
    }

    #[tokio::test]
    async fn test_drains_sealed_file_per_channel() {
        let dir = TempDir::new().unwrap();
        let layout = line_layout();
        let path = sealed_journal(&dir, "stream_a.bin", &layout, 7);
        let sink = Arc::new(MemorySink::new());
        let ing = ingester(&dir, Arc::clone(&sink));

        assert_eq!(ing.scan_once().await, ScanReport { drained: 1, failed: 0 });

        // Channel c holds frame[:, c] concatenated over frames.
        let c0 = sink.concat::<f32>("c0");
        assert_eq!(c0.len(), 14);
        assert_eq!(&c0[..4], &[0.0, 10.0, 100.0, 110.0]);
        let c1 = sink.concat::<f32>("c1");
        assert_eq!(&c1[..2], &[1.0, 11.0]);

        // 7 frames at batch_frames=3: blocks of 3, 3, 1 per key.
        let blocks = sink.blocks("c0");
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].start_logical, 0);
        assert_eq!(blocks[1].start_logical, 3);
        assert_eq!(blocks[2].start_logical, 6);

        // Per-frame wall time in seconds.
        let time = sink.concat::<f64>("time");
        assert_eq!(time.len(), 7);
        assert!((time[0] - 1.0).abs() < 1e-6);

        // File truncated back to header, seal gone.
        assert!(!seal_path(&path).exists());
        let mut reader = SealedReader::open(&path).unwrap();
        assert!(reader.next_record().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unsealed_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let layout = line_layout();
        let path = sealed_journal(&dir, "stream_a.bin", &layout, 2);
        std::fs::remove_file(seal_path(&path)).unwrap();

        let sink = Arc::new(MemorySink::new());
        let ing = ingester(&dir, Arc::clone(&sink));
        assert_eq!(ing.scan_once().await, ScanReport::default());
        assert!(sink.concat::<f32>("c0").is_empty());

        // Records still in place for a later scan.
        let mut reader = SealedReader::open(&path).unwrap();
        assert_eq!(reader.read_all().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reingest_after_truncation_is_noop() {
        let dir = TempDir::new().unwrap();
        let layout = line_layout();
        let path = sealed_journal(&dir, "stream_a.bin", &layout, 4);
        let sink = Arc::new(MemorySink::new());
        let ing = ingester(&dir, Arc::clone(&sink));

        assert_eq!(ing.scan_once().await, ScanReport { drained: 1, failed: 0 });
        let after_first = std::fs::read(&path).unwrap();
        let frames_after_first = sink.concat::<f32>("c0").len();

        // Seal the truncated file again: draining it adds nothing and the
        // bytes stay identical.
        File::create(seal_path(&path)).unwrap();
        assert_eq!(ing.scan_once().await, ScanReport { drained: 1, failed: 0 });
        assert_eq!(std::fs::read(&path).unwrap(), after_first);
        assert_eq!(sink.concat::<f32>("c0").len(), frames_after_first);
    }

    #[tokio::test]
    async fn test_malformed_header_skips_file() {
        let dir = TempDir::new().unwrap();
        let layout = line_layout();
        let good = sealed_journal(&dir, "stream_b.bin", &layout, 2);

        let bad = dir.path().join("stream_a.bin");
        File::create(&bad).unwrap().write_all(b"NOTMAGIC").unwrap();
        File::create(seal_path(&bad)).unwrap();

        let sink = Arc::new(MemorySink::new());
        let plane = Arc::new(MetricsPlane::new());
        let config = IngestConfig::new(&bad, &good).with_batch_frames(3);
        let ing = Ingester::new(config, Arc::clone(&sink) as Arc<dyn FrameSinkBoxed>, Arc::clone(&plane));

        assert_eq!(ing.scan_once().await, ScanReport { drained: 1, failed: 1 });

        // Good file drained; bad file reported but untouched.
        assert_eq!(sink.concat::<f32>("c0").len(), 4);
        assert!(seal_path(&bad).exists());
        assert!(plane.snapshot().ingest_last_error.unwrap().contains("magic"));
    }

    #[tokio::test]
    async fn test_image_mode_flattens_frames() {
        let dir = TempDir::new().unwrap();
        let layout = FrameLayout::new(
            FrameShape::Image {
                height: 2,
                width: 3,
                channels: 1,
            },
            Dtype::U8,
        );
        let path = dir.path().join("stream_a.bin");
        let meta = StreamMeta::new("/cam_ring", &layout);
        let mut bytes = encode_header(&meta).unwrap();
        bytes.extend_from_slice(
            &RecordHeader {
                ts_ns: 7,
                logical_idx: 0,
            }
            .encode(),
        );
        bytes.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
        File::create(&path).unwrap().write_all(&bytes).unwrap();
        File::create(seal_path(&path)).unwrap();

        let sink = Arc::new(MemorySink::new());
        let config = IngestConfig::new(&path, dir.path().join("stream_b.bin"));
        let ing = Ingester::new(
            config,
            Arc::clone(&sink) as Arc<dyn FrameSinkBoxed>,
            Arc::new(MetricsPlane::new()),
        );

        assert_eq!(ing.scan_once().await, ScanReport { drained: 1, failed: 0 });
        assert_eq!(sink.concat::<u8>("image"), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(sink.meta("image_shape"), Some(serde_json::json!([2, 3, 1])));
    }
}
