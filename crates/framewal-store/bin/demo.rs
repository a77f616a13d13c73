//! # Sensor Data Plane Demo
//!
//! End-to-end run of the pipeline: a synthetic sine source publishes line
//! frames into the shared-memory ring, the journal writer drains them to the
//! rotating dual-file log, the ingester moves sealed files into an in-memory
//! sink, and the metrics plane is printed once per second.
//!
//! ## Running
//!
//! ```bash
//! # Line mode, 3 channels, ~200 frames/s for 5 seconds
//! cargo run -p framewal-store --bin framewal-demo --release
//!
//! # Image mode (small synthetic frames)
//! cargo run -p framewal-store --bin framewal-demo --release -- --image
//! ```

use framering::{DataMode, Dtype, FrameSource, SourceBlock};
use framewal_store::{MemorySink, Session, SessionConfig};
use rand::Rng;
use std::io;
use std::sync::Arc;
use std::time::Duration;

const CHANNELS: usize = 3;
const SAMPLES: usize = 64;
const RUN_SECONDS: u64 = 5;
const FRAME_HZ: u64 = 200;

/// Synthetic line source: one sine per channel with a little noise, the
/// stand-in for a serial acquisition driver.
struct SineSource {
    frame: u64,
    remaining: u64,
}

impl FrameSource for SineSource {
    type Elem = f32;

    fn next_block(&mut self) -> io::Result<Option<SourceBlock<f32>>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;

        let mut rng = rand::thread_rng();
        let mut data = Vec::with_capacity(SAMPLES * CHANNELS);
        for s in 0..SAMPLES {
            let t = (self.frame as usize * SAMPLES + s) as f32 / 1000.0;
            for c in 0..CHANNELS {
                let phase = c as f32 * 0.7;
                let noise: f32 = rng.gen_range(-0.05..0.05);
                data.push((t * 6.28 + phase).sin() + noise);
            }
        }
        self.frame += 1;
        Ok(Some(SourceBlock::new(data, vec![SAMPLES, CHANNELS])))
    }
}

/// Synthetic image source: a moving gradient.
struct GradientSource {
    frame: u64,
    remaining: u64,
}

const HEIGHT: usize = 16;
const WIDTH: usize = 16;

impl FrameSource for GradientSource {
    type Elem = u8;

    fn next_block(&mut self) -> io::Result<Option<SourceBlock<u8>>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;

        let shift = self.frame as usize;
        let data: Vec<u8> = (0..HEIGHT * WIDTH)
            .map(|i| ((i + shift) % 256) as u8)
            .collect();
        self.frame += 1;
        Ok(Some(SourceBlock::new(data, vec![HEIGHT, WIDTH, 1])))
    }
}

async fn drive_source<S: FrameSource>(
    session: &Session,
    mut source: S,
    period: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut publisher = session.publisher()?;
    let mut ticker = tokio::time::interval(period);
    while let Some(block) = source.next_block()? {
        ticker.tick().await;
        publisher.publish_block(&block)?;
    }
    publisher.report();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let image_mode = std::env::args().any(|a| a == "--image");
    let dir = std::env::temp_dir().join("framewal-demo");
    std::fs::create_dir_all(&dir)?;

    let mut config = if image_mode {
        SessionConfig::new(
            DataMode::Image,
            vec![HEIGHT, WIDTH, 1],
            Dtype::U8,
            dir.join("stream_a.bin"),
            dir.join("stream_b.bin"),
        )
    } else {
        SessionConfig::new(
            DataMode::Line,
            vec![SAMPLES, CHANNELS],
            Dtype::F32,
            dir.join("stream_a.bin"),
            dir.join("stream_b.bin"),
        )
    };
    config.ring_name = format!("/framewal_demo_{}", std::process::id());
    config.ring_capacity = 1024;
    config.rotate_frames = 256;
    config.overwrite = true;
    if !image_mode {
        config.channel_keys = (0..CHANNELS).map(|c| format!("c{c}")).collect();
    }

    let sink = Arc::new(MemorySink::new());
    let session = Session::start(config, Arc::clone(&sink) as Arc<dyn framewal_store::FrameSinkBoxed>).await?;
    let plane = session.metrics();

    // A stand-in visualization consumer: 30 Hz window reads with timing and
    // backlog reporting, the way a plot front-end would drive the ring.
    let consumer_task = {
        let plane = Arc::clone(&plane);
        let mut cursor = session.consumer()?;
        tokio::spawn(async move {
            let mut timings = framering::RollingTimings::default();
            let mut scratch = Vec::new();
            loop {
                tokio::time::sleep(Duration::from_millis(33)).await;
                let sw = framering::Stopwatch::start();
                if let Some(window) = cursor.poll() {
                    if cursor
                        .ring()
                        .copy_window(window.start, window.count, &mut scratch)
                        .is_err()
                    {
                        continue;
                    }
                    timings.note(sw.elapsed_ms());
                }
                plane.set_consumer_rates(timings.fps(), timings.avg_ms(), 0.0);
                plane.set_consumer_backlog(cursor.frames_lag(), cursor.drops_est());
                plane.heartbeat(framering::Actor::Consumer);
            }
        })
    };

    println!("publishing {RUN_SECONDS}s of synthetic frames at {FRAME_HZ} Hz ...");
    let total_frames = RUN_SECONDS * FRAME_HZ;
    let period = Duration::from_micros(1_000_000 / FRAME_HZ);

    let reporter = {
        let plane = Arc::clone(&plane);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let snap = plane.snapshot();
                println!(
                    "  write_idx={} journaled={} rotations={} ingested={} batches={}",
                    snap.last_write_idx,
                    snap.writer_total_frames,
                    snap.writer_rotations,
                    snap.ingest_frames_ingested,
                    snap.ingest_batches_flushed,
                );
            }
        })
    };

    if image_mode {
        drive_source(
            &session,
            GradientSource {
                frame: 0,
                remaining: total_frames,
            },
            period,
        )
        .await?;
    } else {
        drive_source(
            &session,
            SineSource {
                frame: 0,
                remaining: total_frames,
            },
            period,
        )
        .await?;
    }

    session.shutdown().await;
    reporter.abort();
    consumer_task.abort();

    let snap = plane.snapshot();
    println!("\nfinal metrics:");
    println!("{}", serde_json::to_string_pretty(&snap)?);

    if image_mode {
        println!(
            "sink: {} image elements, shape {:?}",
            sink.concat::<u8>("image").len(),
            sink.meta("image_shape"),
        );
    } else {
        for c in 0..CHANNELS {
            let key = format!("c{c}");
            println!("sink: key {key} holds {} samples", sink.concat::<f32>(&key).len());
        }
        println!("sink: key time holds {} stamps", sink.concat::<f64>("time").len());
    }

    Ok(())
}
