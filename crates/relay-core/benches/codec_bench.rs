//! Criterion benchmarks for the relay frame codec.
//!
//! The codec sits on every frame's hot path on both the broker and client
//! sides, so encode/decode latency is worth tracking.
//!
//! Run with:
//! ```bash
//! cargo bench --package relay-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use relay_core::{
    decode_header, decode_roster, encode_frame, encode_header, encode_roster, ClientId,
    FrameHeader, PayloadKind,
};

fn bench_header(c: &mut Criterion) {
    let header = FrameHeader {
        source: 5,
        destination: -2,
        kind: PayloadKind::Message,
        payload_len: 512,
    };
    let encoded = encode_header(&header);

    c.bench_function("encode_header", |b| {
        b.iter(|| encode_header(black_box(&header)))
    });
    c.bench_function("decode_header", |b| {
        b.iter(|| decode_header(black_box(&encoded)).unwrap())
    });
}

fn bench_frame_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_frame");
    for payload_len in [0usize, 64, 1024, 16 * 1024] {
        let payload = vec![0x42u8; payload_len];
        let header = FrameHeader {
            source: 1,
            destination: 2,
            kind: PayloadKind::Message,
            payload_len: 0,
        };
        group.bench_with_input(
            BenchmarkId::from_parameter(payload_len),
            &payload,
            |b, payload| b.iter(|| encode_frame(black_box(&header), black_box(payload))),
        );
    }
    group.finish();
}

fn bench_roster(c: &mut Criterion) {
    let ids: Vec<ClientId> = (1..=64).map(ClientId).collect();
    let payload = encode_roster(&ids);

    c.bench_function("encode_roster_64", |b| {
        b.iter(|| encode_roster(black_box(&ids)))
    });
    c.bench_function("decode_roster_64", |b| {
        b.iter(|| decode_roster(black_box(&payload)).unwrap())
    });
}

criterion_group!(benches, bench_header, bench_frame_assembly, bench_roster);
criterion_main!(benches);
