//! Ring -> journal drain loop.
//!
//! One task polls the ring's write index at `poll_hz` and appends every new
//! frame to the journal. The loop never blocks the producer: when the ring
//! laps faster than the poll, the unreachable gap is counted as loss and the
//! drain restarts from the oldest frame still safely readable.

use crate::writer::JournalWriter;
use crate::JournalError;
use framering::{Actor, FrameRing, MetricsPlane};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;

/// Backoff after a failed drain before the next attempt.
const ERROR_BACKOFF: Duration = Duration::from_millis(20);

/// Consecutive failures before the writer is reported down.
const ALIVE_ERROR_THRESHOLD: u32 = 10;

/// Dump loop tuning.
#[derive(Debug, Clone)]
pub struct DumpConfig {
    /// Ring poll rate.
    pub poll_hz: f64,
    /// Freshest frames left to the producer when the ring lapped us; the
    /// rest of a lapped backlog is counted as loss.
    pub lag: u64,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            poll_hz: 400.0,
            lag: framering::DEFAULT_LAG,
        }
    }
}

/// Wall clock in nanoseconds for record timestamps.
fn wall_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Drains the ring into the journal until `shutdown` fires, then seals the
/// active file so the ingester can pick up the tail.
///
/// I/O errors are pushed to the metrics plane and retried after a short
/// backoff; the loop itself only ends on shutdown.
pub async fn dump_loop(
    ring: Arc<FrameRing>,
    mut writer: JournalWriter,
    plane: Arc<MetricsPlane>,
    config: DumpConfig,
    mut shutdown: oneshot::Receiver<()>,
) {
    plane.set_writer_alive(true);
    plane.heartbeat(Actor::Writer);

    let period = Duration::from_secs_f64(1.0 / config.poll_hz.max(1.0));
    let mut interval = tokio::time::interval(period);

    let mut last_idx = ring.write_idx();
    let mut consecutive_errors = 0u32;
    let mut frames_since = 0u64;
    let mut last_report = Instant::now();

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match drain_tick(&ring, &mut writer, &plane, config.lag, last_idx) {
                    Ok(new_idx) => {
                        frames_since += new_idx - last_idx;
                        last_idx = new_idx;
                        if consecutive_errors >= ALIVE_ERROR_THRESHOLD {
                            plane.set_writer_alive(true);
                        }
                        consecutive_errors = 0;
                    }
                    Err(e) => {
                        // last_idx stays put: the same range is retried next
                        // tick, and duplicates carry their logical index.
                        tracing::warn!(error = %e, "journal drain failed");
                        plane.set_writer_error(e.to_string());
                        consecutive_errors += 1;
                        if consecutive_errors >= ALIVE_ERROR_THRESHOLD {
                            plane.set_writer_alive(false);
                        }
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                }

                if last_report.elapsed() >= Duration::from_secs(1) {
                    let fps = frames_since as f64 / last_report.elapsed().as_secs_f64();
                    plane.set_writer_fps(fps);
                    plane.heartbeat(Actor::Writer);
                    frames_since = 0;
                    last_report = Instant::now();
                }
            }
            _ = &mut shutdown => {
                // Final drain, then hand the active file to the ingester.
                if let Err(e) = drain_tick(&ring, &mut writer, &plane, config.lag, last_idx) {
                    tracing::warn!(error = %e, "final journal drain failed");
                    plane.set_writer_error(e.to_string());
                }
                if let Err(e) = writer.seal_active() {
                    tracing::warn!(error = %e, "sealing journal on shutdown failed");
                    plane.set_writer_error(e.to_string());
                }
                plane.set_writer_alive(false);
                plane.heartbeat(Actor::Writer);
                break;
            }
        }
    }
}

/// One poll: drains `[last_idx, write_idx)`, bounded to what the ring still
/// holds. Returns the new drain cursor.
fn drain_tick(
    ring: &FrameRing,
    writer: &mut JournalWriter,
    plane: &MetricsPlane,
    lag: u64,
    last_idx: u64,
) -> Result<u64, JournalError> {
    let wi = ring.write_idx();
    if wi == last_idx {
        writer.idle_tick()?;
        return Ok(wi);
    }

    let mut n = wi - last_idx;
    let reachable = (ring.capacity() as u64).saturating_sub(lag).max(1);
    if n > reachable {
        // Ring lapped the writer: the overwritten gap is loss, not an error.
        plane.writer_add_loss(n - reachable);
        n = reachable;
    }

    let start = wi - n;
    let ts_ns = wall_ns();
    let (head, tail) = ring.window_segments(start, n as usize);
    let bytes = ring.view_window(head.start, head.count)?;
    writer.write_frames(bytes, head.start, ts_ns)?;
    if let Some(seg) = tail {
        let bytes = ring.view_window(seg.start, seg.count)?;
        writer.write_frames(bytes, seg.start, ts_ns)?;
    }
    Ok(wi)
}
