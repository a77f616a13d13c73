//! Rotating dual-file journal writer.
//!
//! The writer appends records to one of two alternating files and hands
//! finished files to the ingester through seal sentinels: rotation seals the
//! outgoing file *before* switching, so the ingester never sees a file that
//! is still being written. A missing seal means the writer still owns the
//! file.

use crate::format::{encode_header, seal_path, RecordHeader, StreamMeta, RECORD_HEADER_BYTES};
use crate::JournalError;
use framering::MetricsPlane;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Runtime control surface shared between the session and the writer.
#[derive(Debug, Default)]
pub struct ControlFlags {
    force_rotate: AtomicBool,
}

impl ControlFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the writer to rotate at its next opportunity.
    pub fn request_force_rotate(&self) {
        self.force_rotate.store(true, Ordering::Release);
    }

    /// True while a rotation request is pending.
    pub fn force_rotate_requested(&self) -> bool {
        self.force_rotate.load(Ordering::Acquire)
    }

    /// Consumes a pending request; only the writer calls this.
    fn take_force_rotate(&self) -> bool {
        self.force_rotate.swap(false, Ordering::AcqRel)
    }
}

/// Static configuration of the journal writer.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// First of the two alternating files.
    pub file_a: PathBuf,
    /// Second of the two alternating files.
    pub file_b: PathBuf,
    /// Records per file before rotation.
    pub rotate_frames: u64,
    /// Wall-clock cap between rotations; `None` disables time rotation.
    pub rotate_seconds: Option<Duration>,
    /// Wipe both files (and their seals) at startup.
    pub overwrite: bool,
}

impl JournalConfig {
    pub fn new(file_a: impl Into<PathBuf>, file_b: impl Into<PathBuf>) -> Self {
        Self {
            file_a: file_a.into(),
            file_b: file_b.into(),
            rotate_frames: 8192,
            rotate_seconds: None,
            overwrite: false,
        }
    }

    pub fn with_rotate_frames(mut self, frames: u64) -> Self {
        self.rotate_frames = frames.max(1);
        self
    }

    pub fn with_rotate_seconds(mut self, seconds: Option<Duration>) -> Self {
        self.rotate_seconds = seconds;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// Append-only binary logger over two alternating files with seal markers.
pub struct JournalWriter {
    files: [PathBuf; 2],
    meta: StreamMeta,
    frame_bytes: usize,
    rotate_frames: u64,
    rotate_seconds: Option<Duration>,
    control: Arc<ControlFlags>,
    plane: Arc<MetricsPlane>,
    active: usize,
    fh: File,
    frames_in_active: u64,
    last_rotation: Instant,
}

impl JournalWriter {
    /// Prepares both files and opens the active one for append.
    ///
    /// Missing or zero-length files get a fresh header. The active file is
    /// the one without a seal: a seal on file A means the ingester still owns
    /// it, so the writer resumes on file B. A stale seal on the chosen active
    /// file is removed.
    pub fn open(
        config: &JournalConfig,
        meta: StreamMeta,
        control: Arc<ControlFlags>,
        plane: Arc<MetricsPlane>,
    ) -> Result<Self, JournalError> {
        let files = [config.file_a.clone(), config.file_b.clone()];
        let frame_bytes = meta.frame_bytes()?;

        for path in &files {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        if config.overwrite {
            for path in &files {
                remove_if_present(&seal_path(path))?;
                write_fresh_header(path, &meta)?;
            }
        }
        for path in &files {
            let missing = match std::fs::metadata(path) {
                Ok(md) => md.len() == 0,
                Err(_) => true,
            };
            if missing {
                write_fresh_header(path, &meta)?;
            }
        }

        let mut active = 0;
        if seal_path(&files[active]).exists() {
            active = 1;
        }
        remove_if_present(&seal_path(&files[active]))?;

        let fh = OpenOptions::new().append(true).open(&files[active])?;

        plane.set_writer_active_bin(&files[active]);
        plane.set_writer_seal(0, seal_path(&files[0]).exists());
        plane.set_writer_seal(1, seal_path(&files[1]).exists());

        Ok(Self {
            files,
            meta,
            frame_bytes,
            rotate_frames: config.rotate_frames.max(1),
            rotate_seconds: config.rotate_seconds,
            control,
            plane,
            active,
            fh,
            frames_in_active: 0,
            last_rotation: Instant::now(),
        })
    }

    /// Path of the file currently receiving records.
    pub fn active_path(&self) -> &Path {
        &self.files[self.active]
    }

    /// Records written to the active file since its last header.
    pub fn frames_in_active(&self) -> u64 {
        self.frames_in_active
    }

    /// Appends `payload` (whole canonical frames) as records starting at
    /// logical index `start_logical`, all stamped `ts_ns`.
    ///
    /// A batch is split at the rotation boundary so no record ever crosses
    /// files; rotation happens between records only.
    pub fn write_frames(
        &mut self,
        payload: &[u8],
        start_logical: u64,
        ts_ns: u64,
    ) -> Result<(), JournalError> {
        debug_assert_eq!(payload.len() % self.frame_bytes, 0);
        let nframes = (payload.len() / self.frame_bytes) as u64;
        if nframes == 0 {
            return self.idle_tick();
        }

        let mut written = 0u64;
        while written < nframes {
            let room = self.rotate_frames - self.frames_in_active;
            let chunk = (nframes - written).min(room.max(1));

            // One write_all per chunk: a crash can truncate the tail record,
            // never interleave records.
            let mut buf =
                Vec::with_capacity(chunk as usize * (RECORD_HEADER_BYTES + self.frame_bytes));
            for i in 0..chunk {
                let frame_off = ((written + i) as usize) * self.frame_bytes;
                let header = RecordHeader {
                    ts_ns,
                    logical_idx: start_logical + written + i,
                };
                buf.extend_from_slice(&header.encode());
                buf.extend_from_slice(&payload[frame_off..frame_off + self.frame_bytes]);
            }
            self.fh.write_all(&buf)?;

            self.frames_in_active += chunk;
            self.plane.writer_add_frames(chunk, buf.len() as u64);
            written += chunk;

            if self.frames_in_active >= self.rotate_frames {
                self.rotate()?;
            }
        }

        self.maybe_time_rotate()?;
        self.maybe_force_rotate()?;
        Ok(())
    }

    /// Idle poll tick: no frames, but time/force rotation still applies.
    pub fn idle_tick(&mut self) -> Result<(), JournalError> {
        self.maybe_time_rotate()?;
        self.maybe_force_rotate()?;
        Ok(())
    }

    fn maybe_time_rotate(&mut self) -> Result<(), JournalError> {
        if let Some(cap) = self.rotate_seconds {
            if self.last_rotation.elapsed() >= cap {
                self.rotate()?;
            }
        }
        Ok(())
    }

    fn maybe_force_rotate(&mut self) -> Result<(), JournalError> {
        if self.control.take_force_rotate() {
            self.rotate()?;
        }
        Ok(())
    }

    /// Seals the active file and switches to the other one.
    ///
    /// Order matters for crash safety: flush + fsync the outgoing file, then
    /// create its seal, then prepare the incoming file. The ingester only
    /// ever reads files whose seal exists, so it never observes a
    /// half-rotated state.
    fn rotate(&mut self) -> Result<(), JournalError> {
        self.fh.flush()?;
        self.fh.sync_all()?;
        File::create(seal_path(&self.files[self.active]))?;
        self.plane.set_writer_seal(self.active, true);

        self.active = 1 - self.active;
        remove_if_present(&seal_path(&self.files[self.active]))?;
        self.plane.set_writer_seal(self.active, false);

        write_fresh_header(&self.files[self.active], &self.meta)?;
        self.fh = OpenOptions::new().append(true).open(&self.files[self.active])?;
        self.frames_in_active = 0;
        self.last_rotation = Instant::now();

        self.plane.writer_add_rotation();
        self.plane.set_writer_active_bin(&self.files[self.active]);
        Ok(())
    }

    /// Shutdown path: flush and seal the active file without switching, so
    /// the ingester can drain everything written so far.
    pub fn seal_active(&mut self) -> Result<(), JournalError> {
        self.fh.flush()?;
        self.fh.sync_all()?;
        File::create(seal_path(&self.files[self.active]))?;
        self.plane.set_writer_seal(self.active, true);
        Ok(())
    }
}

fn write_fresh_header(path: &Path, meta: &StreamMeta) -> Result<(), JournalError> {
    let bytes = encode_header(meta)?;
    let mut file = File::create(path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<(), JournalError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::read_header;
    use crate::sealed::SealedReader;
    use framering::{Dtype, FrameLayout, FrameShape};
    use tempfile::TempDir;

    fn line_meta() -> StreamMeta {
        StreamMeta::new(
            "/test_ring",
            &FrameLayout::new(
                FrameShape::Line {
                    samples: 2,
                    channels: 1,
                },
                Dtype::U8,
            ),
        )
    }

    fn writer_in(dir: &TempDir, config: impl FnOnce(JournalConfig) -> JournalConfig) -> JournalWriter {
        let cfg = config(JournalConfig::new(
            dir.path().join("stream_a.bin"),
            dir.path().join("stream_b.bin"),
        ));
        JournalWriter::open(
            &cfg,
            line_meta(),
            Arc::new(ControlFlags::new()),
            Arc::new(MetricsPlane::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_startup_writes_headers() {
        let dir = TempDir::new().unwrap();
        let writer = writer_in(&dir, |c| c);
        assert_eq!(writer.active_path(), dir.path().join("stream_a.bin"));

        for name in ["stream_a.bin", "stream_b.bin"] {
            let mut fh = File::open(dir.path().join(name)).unwrap();
            let header = read_header(&mut fh).unwrap();
            assert_eq!(header.meta, line_meta());
        }
    }

    #[test]
    fn test_startup_adopts_unsealed_file() {
        let dir = TempDir::new().unwrap();
        let file_a = dir.path().join("stream_a.bin");
        {
            let mut writer = writer_in(&dir, |c| c);
            writer.write_frames(&[1, 2], 0, 100).unwrap();
            writer.seal_active().unwrap();
        }
        // Seal on A: a restarted writer must resume on B.
        let writer = writer_in(&dir, |c| c);
        assert_eq!(writer.active_path(), dir.path().join("stream_b.bin"));
        assert!(seal_path(&file_a).exists());
    }

    #[test]
    fn test_rotation_splits_batches_at_boundary() {
        let dir = TempDir::new().unwrap();
        let mut writer = writer_in(&dir, |c| c.with_rotate_frames(5));

        // 12 frames of 2 bytes each: rotations after frames 5 and 10.
        let payload: Vec<u8> = (0..24).collect();
        writer.write_frames(&payload, 0, 7).unwrap();
        assert_eq!(writer.frames_in_active(), 2);

        // Active file (A again after two rotations) holds frames 10 and 11.
        let mut reader = SealedReader::open(writer.active_path()).unwrap();
        let first = reader.next_record().unwrap().unwrap();
        assert_eq!(first.logical_idx, 10);
        assert_eq!(first.payload, vec![20, 21]);
        let second = reader.next_record().unwrap().unwrap();
        assert_eq!(second.logical_idx, 11);
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn test_force_rotate_consumes_flag() {
        let dir = TempDir::new().unwrap();
        let control = Arc::new(ControlFlags::new());
        let cfg = JournalConfig::new(
            dir.path().join("stream_a.bin"),
            dir.path().join("stream_b.bin"),
        )
        .with_rotate_frames(1_000_000);
        let mut writer = JournalWriter::open(
            &cfg,
            line_meta(),
            Arc::clone(&control),
            Arc::new(MetricsPlane::new()),
        )
        .unwrap();

        writer.write_frames(&[1, 2], 0, 50).unwrap();
        control.request_force_rotate();
        writer.idle_tick().unwrap();

        assert!(!control.force_rotate_requested());
        assert_eq!(writer.active_path(), dir.path().join("stream_b.bin"));
        assert!(seal_path(&dir.path().join("stream_a.bin")).exists());
        assert_eq!(writer.frames_in_active(), 0);
    }

    #[test]
    fn test_overwrite_wipes_previous_session() {
        let dir = TempDir::new().unwrap();
        {
            let mut writer = writer_in(&dir, |c| c);
            writer.write_frames(&[1, 2, 3, 4], 0, 1).unwrap();
            writer.seal_active().unwrap();
        }
        let writer = writer_in(&dir, |c| c.with_overwrite(true));
        // Fresh start: back on A, no seals, no records.
        assert_eq!(writer.active_path(), dir.path().join("stream_a.bin"));
        assert!(!seal_path(&dir.path().join("stream_a.bin")).exists());
        let mut reader = SealedReader::open(&dir.path().join("stream_b.bin")).unwrap();
        assert!(reader.next_record().unwrap().is_none());
    }
}
