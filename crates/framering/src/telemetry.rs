//! Shared metrics plane and per-actor timing helpers.
//!
//! Every actor (producer, consumer, journal writer, ingester) publishes into
//! one [`MetricsPlane`]: fixed-size atomics for the hot counters and gauges,
//! read-write locks for the rare string fields (paths, last errors). Each
//! key is last-writer-wins with no tearing; there is no atomicity across
//! keys. Readers poll [`MetricsPlane::snapshot`].
//!
//! Liveness is a per-actor heartbeat updated at >= 1 Hz; a heartbeat older
//! than three seconds is the external signal of a dead actor.

use crossbeam_utils::CachePadded;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Heartbeats older than this mark an actor dead.
pub const STALE_HEARTBEAT: Duration = Duration::from_secs(3);

/// Milliseconds since the unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// An f64 gauge stored as its bit pattern in an `AtomicU64`.
#[derive(Debug, Default)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// The four actors that publish into the plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Producer,
    Consumer,
    Writer,
    Ingester,
}

#[derive(Debug, Default)]
struct ProducerMetrics {
    fps: AtomicF64,
    publish_avg_ms: AtomicF64,
    publish_p95_ms: AtomicF64,
    last_write_idx: AtomicU64,
    heartbeat_ms: AtomicU64,
}

#[derive(Debug, Default)]
struct ConsumerMetrics {
    fps: AtomicF64,
    plot_tick_avg_ms: AtomicF64,
    gpu_upload_avg_ms: AtomicF64,
    frames_lag: AtomicU64,
    drops_est: AtomicU64,
    heartbeat_ms: AtomicU64,
}

#[derive(Debug, Default)]
struct WriterMetrics {
    total_frames: AtomicU64,
    total_bytes: AtomicU64,
    rotations: AtomicU64,
    loss_frames: AtomicU64,
    fps_estimate: AtomicF64,
    alive: AtomicBool,
    seal_present: [AtomicBool; 2],
    heartbeat_ms: AtomicU64,
}

#[derive(Debug, Default)]
struct IngestMetrics {
    frames_ingested: AtomicU64,
    bytes_read: AtomicU64,
    batches_flushed: AtomicU64,
    files_ingested: AtomicU64,
    fps_estimate: AtomicF64,
    alive: AtomicBool,
    heartbeat_ms: AtomicU64,
}

/// Shared dictionary of counters, gauges and liveness heartbeats.
///
/// Hot counter groups are cache-padded per writing actor so the producer's
/// publish counters never false-share with the journal writer's.
#[derive(Debug, Default)]
pub struct MetricsPlane {
    producer: CachePadded<ProducerMetrics>,
    consumer: CachePadded<ConsumerMetrics>,
    writer: CachePadded<WriterMetrics>,
    ingest: CachePadded<IngestMetrics>,
    writer_active_bin: RwLock<Option<PathBuf>>,
    writer_last_error: RwLock<Option<String>>,
    ingest_last_error: RwLock<Option<String>>,
}

impl MetricsPlane {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------------
    // PRODUCER
    // ---------------------------------------------------------------------

    /// Publishes the producer's rolled-up publish timings and rate.
    pub fn set_producer_rates(&self, fps: f64, publish_avg_ms: f64, publish_p95_ms: f64) {
        self.producer.fps.set(fps);
        self.producer.publish_avg_ms.set(publish_avg_ms);
        self.producer.publish_p95_ms.set(publish_p95_ms);
    }

    pub fn set_last_write_idx(&self, idx: u64) {
        self.producer.last_write_idx.store(idx, Ordering::Relaxed);
    }

    // ---------------------------------------------------------------------
    // CONSUMER
    // ---------------------------------------------------------------------

    pub fn set_consumer_rates(&self, fps: f64, plot_tick_avg_ms: f64, gpu_upload_avg_ms: f64) {
        self.consumer.fps.set(fps);
        self.consumer.plot_tick_avg_ms.set(plot_tick_avg_ms);
        self.consumer.gpu_upload_avg_ms.set(gpu_upload_avg_ms);
    }

    pub fn set_consumer_backlog(&self, frames_lag: u64, drops_est: u64) {
        self.consumer.frames_lag.store(frames_lag, Ordering::Relaxed);
        self.consumer.drops_est.store(drops_est, Ordering::Relaxed);
    }

    // ---------------------------------------------------------------------
    // JOURNAL WRITER
    // ---------------------------------------------------------------------

    /// Counts frames (and their on-disk bytes) appended to the journal.
    pub fn writer_add_frames(&self, frames: u64, bytes: u64) {
        self.writer.total_frames.fetch_add(frames, Ordering::Relaxed);
        self.writer.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn writer_add_rotation(&self) {
        self.writer.rotations.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts frames lost because the ring lapped the writer.
    pub fn writer_add_loss(&self, frames: u64) {
        self.writer.loss_frames.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn set_writer_fps(&self, fps: f64) {
        self.writer.fps_estimate.set(fps);
    }

    pub fn set_writer_alive(&self, alive: bool) {
        self.writer.alive.store(alive, Ordering::Relaxed);
    }

    pub fn set_writer_seal(&self, file: usize, present: bool) {
        if let Some(flag) = self.writer.seal_present.get(file) {
            flag.store(present, Ordering::Relaxed);
        }
    }

    pub fn set_writer_active_bin(&self, path: &Path) {
        *write_lock(&self.writer_active_bin) = Some(path.to_owned());
    }

    pub fn set_writer_error(&self, error: impl Into<String>) {
        *write_lock(&self.writer_last_error) = Some(error.into());
    }

    // ---------------------------------------------------------------------
    // INGESTER
    // ---------------------------------------------------------------------

    pub fn ingest_add(&self, frames: u64, bytes: u64, batches: u64) {
        self.ingest.frames_ingested.fetch_add(frames, Ordering::Relaxed);
        self.ingest.bytes_read.fetch_add(bytes, Ordering::Relaxed);
        self.ingest.batches_flushed.fetch_add(batches, Ordering::Relaxed);
    }

    pub fn ingest_add_file(&self) {
        self.ingest.files_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_ingest_fps(&self, fps: f64) {
        self.ingest.fps_estimate.set(fps);
    }

    pub fn set_ingest_alive(&self, alive: bool) {
        self.ingest.alive.store(alive, Ordering::Relaxed);
    }

    pub fn set_ingest_error(&self, error: impl Into<String>) {
        *write_lock(&self.ingest_last_error) = Some(error.into());
    }

    pub fn ingest_frames_ingested(&self) -> u64 {
        self.ingest.frames_ingested.load(Ordering::Relaxed)
    }

    // ---------------------------------------------------------------------
    // LIVENESS
    // ---------------------------------------------------------------------

    /// Stamps the actor's heartbeat with the current wall clock.
    pub fn heartbeat(&self, actor: Actor) {
        self.heartbeat_slot(actor).store(unix_millis(), Ordering::Relaxed);
    }

    /// Unix-millis of the actor's last heartbeat (0 = never).
    pub fn last_heartbeat(&self, actor: Actor) -> u64 {
        self.heartbeat_slot(actor).load(Ordering::Relaxed)
    }

    /// True when the actor has not heartbeat within [`STALE_HEARTBEAT`].
    pub fn is_stale(&self, actor: Actor) -> bool {
        let last = self.last_heartbeat(actor);
        last == 0 || unix_millis().saturating_sub(last) > STALE_HEARTBEAT.as_millis() as u64
    }

    fn heartbeat_slot(&self, actor: Actor) -> &AtomicU64 {
        match actor {
            Actor::Producer => &self.producer.heartbeat_ms,
            Actor::Consumer => &self.consumer.heartbeat_ms,
            Actor::Writer => &self.writer.heartbeat_ms,
            Actor::Ingester => &self.ingest.heartbeat_ms,
        }
    }

    /// Point-in-time copy of every key. Keys are individually consistent;
    /// the snapshot as a whole is not atomic.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            producer_fps: self.producer.fps.get(),
            publish_avg_ms: self.producer.publish_avg_ms.get(),
            publish_p95_ms: self.producer.publish_p95_ms.get(),
            last_write_idx: self.producer.last_write_idx.load(Ordering::Relaxed),
            consumer_fps: self.consumer.fps.get(),
            plot_tick_avg_ms: self.consumer.plot_tick_avg_ms.get(),
            gpu_upload_avg_ms: self.consumer.gpu_upload_avg_ms.get(),
            frames_lag: self.consumer.frames_lag.load(Ordering::Relaxed),
            drops_est: self.consumer.drops_est.load(Ordering::Relaxed),
            writer_active_bin: read_lock(&self.writer_active_bin).clone(),
            writer_total_frames: self.writer.total_frames.load(Ordering::Relaxed),
            writer_total_bytes: self.writer.total_bytes.load(Ordering::Relaxed),
            writer_rotations: self.writer.rotations.load(Ordering::Relaxed),
            writer_loss_frames: self.writer.loss_frames.load(Ordering::Relaxed),
            writer_fps_estimate: self.writer.fps_estimate.get(),
            writer_alive: self.writer.alive.load(Ordering::Relaxed),
            writer_seal_present: [
                self.writer.seal_present[0].load(Ordering::Relaxed),
                self.writer.seal_present[1].load(Ordering::Relaxed),
            ],
            writer_last_error: read_lock(&self.writer_last_error).clone(),
            ingest_frames_ingested: self.ingest.frames_ingested.load(Ordering::Relaxed),
            ingest_bytes_read: self.ingest.bytes_read.load(Ordering::Relaxed),
            ingest_batches_flushed: self.ingest.batches_flushed.load(Ordering::Relaxed),
            ingest_files_ingested: self.ingest.files_ingested.load(Ordering::Relaxed),
            ingest_fps_estimate: self.ingest.fps_estimate.get(),
            ingest_alive: self.ingest.alive.load(Ordering::Relaxed),
            ingest_last_error: read_lock(&self.ingest_last_error).clone(),
        }
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

/// Plain copy of the plane for polling readers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub producer_fps: f64,
    pub publish_avg_ms: f64,
    pub publish_p95_ms: f64,
    pub last_write_idx: u64,
    pub consumer_fps: f64,
    pub plot_tick_avg_ms: f64,
    pub gpu_upload_avg_ms: f64,
    pub frames_lag: u64,
    pub drops_est: u64,
    pub writer_active_bin: Option<PathBuf>,
    pub writer_total_frames: u64,
    pub writer_total_bytes: u64,
    pub writer_rotations: u64,
    pub writer_loss_frames: u64,
    pub writer_fps_estimate: f64,
    pub writer_alive: bool,
    pub writer_seal_present: [bool; 2],
    pub writer_last_error: Option<String>,
    pub ingest_frames_ingested: u64,
    pub ingest_bytes_read: u64,
    pub ingest_batches_flushed: u64,
    pub ingest_files_ingested: u64,
    pub ingest_fps_estimate: f64,
    pub ingest_alive: bool,
    pub ingest_last_error: Option<String>,
}

/// Rolling window of millisecond timings with an EWMA event rate.
///
/// One instance per actor, owned by that actor's loop; the rolled-up
/// avg/p95/fps values are pushed into the shared plane once per heartbeat.
#[derive(Debug)]
pub struct RollingTimings {
    window: std::collections::VecDeque<f64>,
    cap: usize,
    fps: f64,
    last_event: Option<Instant>,
}

impl RollingTimings {
    /// Default sample window, matching a few seconds of steady traffic.
    pub const DEFAULT_WINDOW: usize = 500;

    pub fn new(window: usize) -> Self {
        Self {
            window: std::collections::VecDeque::with_capacity(window),
            cap: window.max(1),
            fps: 0.0,
            last_event: None,
        }
    }

    /// Records one event taking `ms` milliseconds, advancing the rate.
    pub fn note(&mut self, ms: f64) {
        if self.window.len() == self.cap {
            self.window.pop_front();
        }
        self.window.push_back(ms);

        let now = Instant::now();
        if let Some(prev) = self.last_event {
            let dt = now.duration_since(prev).as_secs_f64();
            if dt > 0.0 {
                // EWMA for stability.
                self.fps = 0.9 * self.fps + 0.1 * (1.0 / dt);
            }
        }
        self.last_event = Some(now);
    }

    pub fn avg_ms(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }

    pub fn p95_ms(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.window.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let rank = ((sorted.len() - 1) as f64 * 0.95).round() as usize;
        sorted[rank]
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }
}

impl Default for RollingTimings {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WINDOW)
    }
}

/// Wall-clock stopwatch for timing one operation in milliseconds.
#[derive(Debug)]
pub struct Stopwatch(Instant);

impl Stopwatch {
    pub fn start() -> Self {
        Self(Instant::now())
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.0.elapsed().as_secs_f64() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let plane = MetricsPlane::new();
        plane.writer_add_frames(5, 320);
        plane.writer_add_frames(3, 192);
        plane.writer_add_rotation();
        plane.ingest_add(8, 512, 1);

        let snap = plane.snapshot();
        assert_eq!(snap.writer_total_frames, 8);
        assert_eq!(snap.writer_total_bytes, 512);
        assert_eq!(snap.writer_rotations, 1);
        assert_eq!(snap.ingest_frames_ingested, 8);
        assert_eq!(snap.ingest_batches_flushed, 1);
    }

    #[test]
    fn test_gauges_last_writer_wins() {
        let plane = MetricsPlane::new();
        plane.set_writer_fps(100.0);
        plane.set_writer_fps(250.5);
        assert_eq!(plane.snapshot().writer_fps_estimate, 250.5);
    }

    #[test]
    fn test_error_strings() {
        let plane = MetricsPlane::new();
        assert!(plane.snapshot().writer_last_error.is_none());
        plane.set_writer_error("IoError: disk full");
        assert_eq!(
            plane.snapshot().writer_last_error.as_deref(),
            Some("IoError: disk full")
        );
    }

    #[test]
    fn test_heartbeat_staleness() {
        let plane = MetricsPlane::new();
        assert!(plane.is_stale(Actor::Writer));
        plane.heartbeat(Actor::Writer);
        assert!(!plane.is_stale(Actor::Writer));
        assert!(plane.is_stale(Actor::Ingester));
    }

    #[test]
    fn test_rolling_timings_stats() {
        let mut t = RollingTimings::new(4);
        for ms in [1.0, 2.0, 3.0, 4.0, 5.0] {
            t.note(ms);
        }
        // Window holds the last 4 samples.
        assert_eq!(t.avg_ms(), 3.5);
        assert_eq!(t.p95_ms(), 5.0);
    }
}
