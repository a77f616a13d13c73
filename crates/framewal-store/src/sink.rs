//! The durable sink boundary: a keyed store of appendable sample sequences.
//!
//! Line mode appends one block per channel slice (plus a `time` key of f64
//! seconds); image mode appends flattened pixel blocks under `image` with an
//! `image_shape` metadata entry. Every block carries the logical index of
//! its first frame, so a downstream reader can deduplicate replays after a
//! mid-flush crash.

use framering::{samples_from_bytes, Dtype, Sample};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Mutex;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Error types for sink operations.
#[derive(Debug, Error, Clone)]
pub enum SinkError {
    /// Store-layer I/O failure.
    #[error("sink I/O error: {0}")]
    Io(String),
    /// Serialization failure.
    #[error("sink serialization error: {0}")]
    Serialization(String),
    /// A key already holds samples of a different element type.
    #[error("dtype mismatch on key {key}: stored {stored}, appended {appended}")]
    Dtype {
        key: String,
        stored: Dtype,
        appended: Dtype,
    },
}

/// One appended block: contiguous little-endian samples plus provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBlock {
    pub dtype: Dtype,
    /// Logical index of the first frame the block was cut from.
    pub start_logical: u64,
    /// Little-endian element bytes.
    pub data: Vec<u8>,
}

impl SampleBlock {
    pub fn new(dtype: Dtype, start_logical: u64, data: Vec<u8>) -> Self {
        Self {
            dtype,
            start_logical,
            data,
        }
    }

    /// Element count.
    pub fn len(&self) -> usize {
        self.data.len() / self.dtype.size()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decodes the block; `None` on a dtype mismatch.
    pub fn to_samples<T: Sample>(&self) -> Option<Vec<T>> {
        if T::DTYPE != self.dtype {
            return None;
        }
        samples_from_bytes(&self.data)
    }
}

/// A durable keyed store accepting appends of sample blocks.
///
/// Uses native async fn in traits; for dynamic dispatch use
/// [`FrameSinkBoxed`], which every `FrameSink` implements via the blanket
/// impl below.
pub trait FrameSink: Send + Sync {
    /// Creates the key (empty) if missing; existing data is untouched.
    fn ensure_key(
        &self,
        key: &str,
        dtype: Dtype,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// Appends one block to the key's sequence.
    fn append(
        &self,
        key: &str,
        block: SampleBlock,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// Sets an immutable sidecar value (e.g. `image_shape`).
    fn put_meta(
        &self,
        key: &str,
        value: serde_json::Value,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// Sink name for diagnostics.
    fn name(&self) -> &str;
}

/// Object-safe version of [`FrameSink`] for dynamic dispatch.
pub trait FrameSinkBoxed: Send + Sync {
    fn ensure_key_boxed<'a>(
        &'a self,
        key: &'a str,
        dtype: Dtype,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;

    fn append_boxed<'a>(
        &'a self,
        key: &'a str,
        block: SampleBlock,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;

    fn put_meta_boxed<'a>(
        &'a self,
        key: &'a str,
        value: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;

    fn name(&self) -> &str;
}

/// Blanket implementation: any `FrameSink` can be used as `FrameSinkBoxed`.
impl<T: FrameSink> FrameSinkBoxed for T {
    fn ensure_key_boxed<'a>(
        &'a self,
        key: &'a str,
        dtype: Dtype,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(self.ensure_key(key, dtype))
    }

    fn append_boxed<'a>(
        &'a self,
        key: &'a str,
        block: SampleBlock,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(self.append(key, block))
    }

    fn put_meta_boxed<'a>(
        &'a self,
        key: &'a str,
        value: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(self.put_meta(key, value))
    }

    fn name(&self) -> &str {
        FrameSink::name(self)
    }
}

#[derive(Debug, Default)]
struct MemoryChannel {
    dtype: Option<Dtype>,
    blocks: Vec<SampleBlock>,
}

/// In-memory sink for tests, demos and benchmarking the plane in isolation.
#[derive(Debug, Default)]
pub struct MemorySink {
    channels: Mutex<HashMap<String, MemoryChannel>>,
    meta: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks appended to `key`, in append order.
    pub fn blocks(&self, key: &str) -> Vec<SampleBlock> {
        self.channels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .map(|ch| ch.blocks.clone())
            .unwrap_or_default()
    }

    /// Concatenation of every block on `key`, decoded.
    pub fn concat<T: Sample>(&self, key: &str) -> Vec<T> {
        self.blocks(key)
            .iter()
            .filter_map(SampleBlock::to_samples)
            .flatten()
            .collect()
    }

    /// Sidecar value for `key`, if set.
    pub fn meta(&self, key: &str) -> Option<serde_json::Value> {
        self.meta
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// All channel keys, including empty pre-created ones.
    pub fn keys(&self) -> Vec<String> {
        self.channels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl FrameSink for MemorySink {
    async fn ensure_key(&self, key: &str, dtype: Dtype) -> Result<(), SinkError> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let channel = channels.entry(key.to_owned()).or_default();
        match channel.dtype {
            None => {
                channel.dtype = Some(dtype);
                Ok(())
            }
            Some(stored) if stored == dtype => Ok(()),
            Some(stored) => Err(SinkError::Dtype {
                key: key.to_owned(),
                stored,
                appended: dtype,
            }),
        }
    }

    async fn append(&self, key: &str, block: SampleBlock) -> Result<(), SinkError> {
        self.ensure_key(key, block.dtype).await?;
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        channels
            .entry(key.to_owned())
            .or_default()
            .blocks
            .push(block);
        Ok(())
    }

    async fn put_meta(&self, key: &str, value: serde_json::Value) -> Result<(), SinkError> {
        self.meta
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.to_owned(), value);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// JSONL record written by [`JsonFileSink`], one line per appended block.
#[derive(Serialize)]
struct JsonBlock<'a> {
    start_logical: u64,
    dtype: &'a str,
    values: serde_json::Value,
}

/// File-backed sink for local development: one `<key>.jsonl` per channel,
/// one JSON line per appended block, plus `<key>.meta.json` sidecars.
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn key_path(&self, key: &str, suffix: &str) -> PathBuf {
        // Channel keys are caller-chosen; keep them filesystem-safe.
        let safe: String = key
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}{suffix}"))
    }

    fn decode_values(block: &SampleBlock) -> serde_json::Value {
        fn nums<T: Sample + Into<serde_json::Value>>(block: &SampleBlock) -> serde_json::Value {
            block
                .to_samples::<T>()
                .map(|v| serde_json::Value::Array(v.into_iter().map(Into::into).collect()))
                .unwrap_or(serde_json::Value::Null)
        }
        match block.dtype {
            Dtype::U8 => nums::<u8>(block),
            Dtype::U16 => nums::<u16>(block),
            Dtype::I16 => nums::<i16>(block),
            Dtype::I32 => nums::<i32>(block),
            Dtype::F32 => nums::<f32>(block),
            Dtype::F64 => nums::<f64>(block),
        }
    }
}

impl FrameSink for JsonFileSink {
    async fn ensure_key(&self, key: &str, _dtype: Dtype) -> Result<(), SinkError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SinkError::Io(e.to_string()))?;
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.key_path(key, ".jsonl"))
            .await
            .map_err(|e| SinkError::Io(e.to_string()))?;
        Ok(())
    }

    async fn append(&self, key: &str, block: SampleBlock) -> Result<(), SinkError> {
        let record = JsonBlock {
            start_logical: block.start_logical,
            dtype: block.dtype.name(),
            values: Self::decode_values(&block),
        };
        let mut line =
            serde_json::to_vec(&record).map_err(|e| SinkError::Serialization(e.to_string()))?;
        line.push(b'\n');

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SinkError::Io(e.to_string()))?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.key_path(key, ".jsonl"))
            .await
            .map_err(|e| SinkError::Io(e.to_string()))?;
        file.write_all(&line)
            .await
            .map_err(|e| SinkError::Io(e.to_string()))?;
        Ok(())
    }

    async fn put_meta(&self, key: &str, value: serde_json::Value) -> Result<(), SinkError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SinkError::Io(e.to_string()))?;
        let json = serde_json::to_vec_pretty(&value)
            .map_err(|e| SinkError::Serialization(e.to_string()))?;
        tokio::fs::write(self.key_path(key, ".meta.json"), json)
            .await
            .map_err(|e| SinkError::Io(e.to_string()))?;
        Ok(())
    }

    fn name(&self) -> &str {
        "json_file"
    }
}

/// Sink that discards everything (for benchmarking the plane).
#[derive(Debug, Default)]
pub struct NullSink;

impl NullSink {
    pub fn new() -> Self {
        Self
    }
}

impl FrameSink for NullSink {
    async fn ensure_key(&self, _key: &str, _dtype: Dtype) -> Result<(), SinkError> {
        Ok(())
    }

    async fn append(&self, _key: &str, _block: SampleBlock) -> Result<(), SinkError> {
        Ok(())
    }

    async fn put_meta(&self, _key: &str, _value: serde_json::Value) -> Result<(), SinkError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framering::sample_bytes;

    #[tokio::test]
    async fn test_memory_sink_appends_in_order() {
        let sink = MemorySink::new();
        sink.append(
            "c0",
            SampleBlock::new(Dtype::F32, 0, sample_bytes(&[1.0f32, 2.0]).to_vec()),
        )
        .await
        .unwrap();
        sink.append(
            "c0",
            SampleBlock::new(Dtype::F32, 2, sample_bytes(&[3.0f32]).to_vec()),
        )
        .await
        .unwrap();

        assert_eq!(sink.concat::<f32>("c0"), vec![1.0, 2.0, 3.0]);
        let blocks = sink.blocks("c0");
        assert_eq!(blocks[1].start_logical, 2);
    }

    #[tokio::test]
    async fn test_memory_sink_rejects_dtype_change() {
        let sink = MemorySink::new();
        sink.ensure_key("c0", Dtype::F32).await.unwrap();
        let err = sink
            .append("c0", SampleBlock::new(Dtype::U8, 0, vec![1]))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Dtype { .. }));
    }

    #[tokio::test]
    async fn test_ensure_key_creates_empty() {
        let sink = MemorySink::new();
        sink.ensure_key("time", Dtype::F64).await.unwrap();
        assert!(sink.keys().contains(&"time".to_owned()));
        assert!(sink.blocks("time").is_empty());
    }

    #[tokio::test]
    async fn test_json_file_sink_writes_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let sink = JsonFileSink::new(dir.path());
        sink.append(
            "c0",
            SampleBlock::new(Dtype::U8, 5, vec![1, 2, 3]),
        )
        .await
        .unwrap();
        sink.put_meta("image_shape", serde_json::json!([2, 3, 1]))
            .await
            .unwrap();

        let text = std::fs::read_to_string(dir.path().join("c0.jsonl")).unwrap();
        let line: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(line["start_logical"], 5);
        assert_eq!(line["dtype"], "uint8");
        assert_eq!(line["values"], serde_json::json!([1, 2, 3]));

        let meta = std::fs::read_to_string(dir.path().join("image_shape.meta.json")).unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&meta).unwrap(),
            serde_json::json!([2, 3, 1])
        );
    }

    #[tokio::test]
    async fn test_boxed_dispatch() {
        let sink: std::sync::Arc<dyn FrameSinkBoxed> = std::sync::Arc::new(MemorySink::new());
        sink.ensure_key_boxed("c0", Dtype::F32).await.unwrap();
        sink.append_boxed(
            "c0",
            SampleBlock::new(Dtype::F32, 0, sample_bytes(&[4.5f32]).to_vec()),
        )
        .await
        .unwrap();
        assert_eq!(sink.name(), "memory");
    }
}
