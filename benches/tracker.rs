//! Benchmark suite for the per-sighting hot path.
//!
//! Isolates decoding, distance estimation and tracker maintenance from
//! async runtime overhead.

use beacon_listener::{PresenceTracker, decode, distance};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

fn ibeacon_record() -> Vec<u8> {
    let mut raw = vec![0x02, 0x01, 0x06, 0x1A, 0xFF, 0x4C, 0x00, 0x02, 0x15];
    raw.extend((0u8..16).map(|i| i * 17));
    raw.extend_from_slice(&[0x00, 0x01, 0x00, 0x02, 0xC5]);
    raw
}

fn address(i: usize) -> String {
    format!("AA:BB:CC:DD:{:02X}:{:02X}", i / 256, i % 256)
}

fn filled_tracker(size: usize) -> PresenceTracker {
    let raw = ibeacon_record();
    let mut tracker = PresenceTracker::new();
    for i in 0..size {
        let identity = decode(&address(i), &raw).unwrap();
        tracker.add_device(identity, -40 - (i % 60) as i16, None);
    }
    tracker
}

fn bench_decode(c: &mut Criterion) {
    let raw = ibeacon_record();
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1));
    group.bench_function("ibeacon", |b| {
        b.iter(|| decode(black_box("AA:BB:CC:DD:EE:FF"), black_box(&raw)))
    });
    group.bench_function("too_short", |b| {
        b.iter(|| decode(black_box("AA:BB:CC:DD:EE:FF"), black_box(&raw[..20])))
    });
    group.finish();
}

fn bench_estimate(c: &mut Criterion) {
    c.bench_function("estimate_sweep", |b| {
        b.iter(|| {
            let mut total = 0.0;
            for rssi in -100i16..0 {
                total += distance::estimate(black_box(rssi), black_box(58));
            }
            total
        })
    });
}

fn bench_tracker(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracker");

    for size in [10, 100, 500] {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("refresh_all", size), &size, |b, &size| {
            let raw = ibeacon_record();
            let identities: Vec<_> = (0..size)
                .map(|i| decode(&address(i), &raw).unwrap())
                .collect();
            let mut tracker = filled_tracker(size);
            b.iter(|| {
                tracker.begin_cycle();
                for identity in &identities {
                    tracker.add_device(identity.clone(), -60, None);
                }
            })
        });

        group.bench_with_input(BenchmarkId::new("sort", size), &size, |b, &size| {
            let tracker = filled_tracker(size);
            b.iter(|| {
                let mut tracker = tracker.clone();
                tracker.sort_by_distance();
                black_box(tracker)
            })
        });

        group.bench_with_input(BenchmarkId::new("evict", size), &size, |b, &size| {
            let tracker = filled_tracker(size);
            b.iter(|| {
                let mut tracker = tracker.clone();
                black_box(tracker.evict())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decode, bench_estimate, bench_tracker);
criterion_main!(benches);
