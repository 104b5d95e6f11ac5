use std::time::{Duration, Instant};

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use msrp_core::{ByteRange, ChunkReceiver, ChunkSender, Flag};

const MESSAGE_SIZE: usize = 1024 * 1024;

fn bench_chunking(c: &mut Criterion) {
    let payload = vec![0x5A; MESSAGE_SIZE];

    let mut group = c.benchmark_group("sender_chunking");
    group.throughput(Throughput::Bytes(MESSAGE_SIZE as u64));
    for chunk_size in [2048usize, 16384, 65536] {
        group.bench_with_input(BenchmarkId::from_parameter(chunk_size), &chunk_size, |b, &chunk_size| {
            b.iter(|| {
                let now = Instant::now();
                let mut sender = ChunkSender::new(
                    "bench",
                    Box::new(payload.clone()),
                    "application/octet-stream",
                    chunk_size,
                    Duration::from_secs(120),
                );
                let mut chunks = 0;
                while !sender.is_send_complete() {
                    black_box(sender.next_chunk(now).unwrap());
                    chunks += 1;
                }
                chunks
            })
        });
    }
    group.finish();
}

fn bench_reassembly(c: &mut Criterion) {
    let chunk_size = 2048usize;
    let chunks: Vec<(ByteRange, Vec<u8>)> = (0..MESSAGE_SIZE / chunk_size)
        .map(|i| {
            let start = (i * chunk_size) as u64 + 1;
            let end = start + chunk_size as u64 - 1;
            (ByteRange::new(start, end, MESSAGE_SIZE as u64), vec![i as u8; chunk_size])
        })
        .collect();

    let mut group = c.benchmark_group("receiver_reassembly");
    group.throughput(Throughput::Bytes(MESSAGE_SIZE as u64));

    group.bench_function("in_order", |b| {
        b.iter(|| {
            let now = Instant::now();
            let mut receiver = ChunkReceiver::new("bench", None, Some(MESSAGE_SIZE as u64), 1 << 20, now);
            for (range, body) in &chunks {
                receiver.process_chunk("bench", *range, Flag::Continued, body, now);
            }
            receiver.is_complete()
        })
    });

    group.bench_function("reversed", |b| {
        b.iter(|| {
            let now = Instant::now();
            let mut receiver = ChunkReceiver::new("bench", None, Some(MESSAGE_SIZE as u64), 1 << 20, now);
            for (range, body) in chunks.iter().rev() {
                receiver.process_chunk("bench", *range, Flag::Continued, body, now);
            }
            receiver.is_complete()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_chunking, bench_reassembly);
criterion_main!(benches);
