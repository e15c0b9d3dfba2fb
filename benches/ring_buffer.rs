//! Ring Buffer Benchmarks
//!
//! Push/pop throughput of the SPSC ring at render-quantum sizes, plus the
//! interleave step the recorder runs every quantum.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use track_transport::audio::buffer::RingBuffer;
use track_transport::audio::interleave::interleave;

const BLOCK_SIZES: &[usize] = &[128, 256, 512, 1024];

fn bench_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_push_pop");

    for &size in BLOCK_SIZES {
        group.throughput(Throughput::Elements(size as u64));

        let ring = RingBuffer::<f32>::with_capacity(size * 4).unwrap();
        let (mut producer, mut consumer) = ring.split().unwrap();
        let input: Vec<f32> = (0..size).map(|i| (i as f32 * 0.01).sin()).collect();
        let mut output = vec![0.0f32; size];

        group.bench_with_input(BenchmarkId::new("f32", size), &size, |b, _| {
            b.iter(|| {
                let written = producer.push(black_box(&input));
                let read = consumer.pop(&mut output);
                black_box((written, read))
            })
        });
    }

    group.finish();
}

fn bench_wraparound(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_wraparound");

    // Odd capacity keeps every push straddling the end of storage
    let ring = RingBuffer::<f32>::with_capacity(1000).unwrap();
    let (mut producer, mut consumer) = ring.split().unwrap();
    let input = vec![0.5f32; 384];
    let mut output = vec![0.0f32; 384];

    group.throughput(Throughput::Elements(384));
    group.bench_function("f32_384", |b| {
        b.iter(|| {
            producer.push(&input);
            black_box(consumer.pop(&mut output))
        })
    });

    group.finish();
}

fn bench_interleave(c: &mut Criterion) {
    let mut group = c.benchmark_group("interleave_stereo");

    for &size in BLOCK_SIZES {
        group.throughput(Throughput::Elements((size * 2) as u64));

        let left = vec![0.25f32; size];
        let right = vec![-0.25f32; size];
        let mut output = vec![0.0f32; size * 2];

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                interleave(&[&left[..], &right[..]], &mut output).unwrap();
                black_box(&output)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_push_pop, bench_wraparound, bench_interleave);
criterion_main!(benches);
