//! Benchmarks for the RESP codec.
//!
//! Run benchmarks:
//! ```bash
//! cargo bench --bench codec_benchmark
//! ```

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use plexis::proto::codec::{Decoder, Encoder};
use plexis::RespValue;

/// Encodes `count` replies of the given shape back to back.
fn encoded_replies(value: &RespValue, count: usize) -> Bytes {
    let mut encoder = Encoder::new();
    for _ in 0..count {
        encoder.encode(value);
    }
    encoder.take().freeze()
}

fn decode_all(data: &[u8], chunk: usize) -> usize {
    let mut decoder = Decoder::new();
    let mut decoded = 0;
    for piece in data.chunks(chunk) {
        decoder.append(piece);
        while let Ok(Some(value)) = decoder.decode() {
            black_box(value);
            decoded += 1;
        }
    }
    decoded
}

/// Benchmark: bulk string replies of increasing size, fed whole.
fn bench_decode_bulk(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_bulk");

    for size in [64, 1024, 16 * 1024, 1024 * 1024].iter() {
        let data = encoded_replies(&RespValue::bulk(vec![b'x'; *size]), 1);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| decode_all(black_box(data), data.len()));
        });
    }

    group.finish();
}

/// Benchmark: a large bulk string arriving in socket-sized chunks.
fn bench_decode_chunked(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_chunked");
    let data = encoded_replies(&RespValue::bulk(vec![b'x'; 4 * 1024 * 1024]), 1);
    group.throughput(Throughput::Bytes(data.len() as u64));

    for chunk in [1024, 8 * 1024, 64 * 1024].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(chunk), chunk, |b, &chunk| {
            b.iter(|| decode_all(black_box(&data), chunk));
        });
    }

    group.finish();
}

/// Benchmark: many small pipelined replies, including nested SCAN-style arrays.
fn bench_decode_pipelined(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_pipelined");

    let status = encoded_replies(&RespValue::status("OK"), 1000);
    group.throughput(Throughput::Elements(1000));
    group.bench_function("status", |b| {
        b.iter(|| decode_all(black_box(&status), 8 * 1024));
    });

    let scan = RespValue::array(vec![
        RespValue::bulk("42"),
        RespValue::array((0..10).map(|i| RespValue::bulk(format!("key:{}", i))).collect()),
    ]);
    let scan = encoded_replies(&scan, 1000);
    group.bench_function("scan_reply", |b| {
        b.iter(|| decode_all(black_box(&scan), 8 * 1024));
    });

    group.finish();
}

/// Benchmark: command encoding.
fn bench_encode_command(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_command");
    let mut encoder = Encoder::new();

    for size in [16, 1024, 64 * 1024].iter() {
        let args = vec![
            Bytes::from("SET"),
            Bytes::from("bench:key"),
            Bytes::from(vec![b'v'; *size]),
        ];
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &args, |b, args| {
            b.iter(|| {
                encoder.encode_command(black_box(args));
                black_box(encoder.take());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_decode_bulk,
    bench_decode_chunked,
    bench_decode_pipelined,
    bench_encode_command
);
criterion_main!(benches);
