//! Criterion benchmarks for the ring hot paths: publish and window views.
//!
//! Run with: cargo bench --bench ring_throughput

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use framering::FrameRing;

fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");

    // Frame sizes common for line (samples x channels x f32) and small images.
    let sizes = vec![("48B", 48usize), ("1KB", 1024), ("16KB", 16 * 1024)];

    for (name, frame_bytes) in sizes {
        let ring_name = format!("/framering_bench_pub_{}_{}", std::process::id(), frame_bytes);
        let ring = FrameRing::create(&ring_name, 4096, frame_bytes).unwrap();
        let frame = vec![0xA5u8; frame_bytes];

        group.throughput(Throughput::Bytes(frame_bytes as u64));
        group.bench_with_input(BenchmarkId::new("single_frame", name), &frame_bytes, |b, _| {
            b.iter(|| {
                ring.publish(black_box(&frame)).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_view_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("view_window");

    let frame_bytes = 1024usize;
    let window = 32usize;
    let ring_name = format!("/framering_bench_view_{}", std::process::id());
    let ring = FrameRing::create(&ring_name, 4096, frame_bytes).unwrap();
    let frame = vec![0x5Au8; frame_bytes];
    for _ in 0..window {
        ring.publish(&frame).unwrap();
    }

    group.throughput(Throughput::Bytes((window * frame_bytes) as u64));
    group.bench_function("borrow_32_frames", |b| {
        b.iter(|| {
            let view = ring.view_window(0, window).unwrap();
            black_box(view);
        });
    });

    let mut out = Vec::new();
    group.bench_function("copy_32_frames", |b| {
        b.iter(|| {
            ring.copy_window(0, window, &mut out).unwrap();
            black_box(&out);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_publish, bench_view_window);
criterion_main!(benches);
