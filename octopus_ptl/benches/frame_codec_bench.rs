//! Frame codec throughput benchmarks.
//!
//! Measures `build` and `FrameParser::feed` cost for a single small frame,
//! and `feed` cost for a stream carrying several frames back to back.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use octopus_ptl::frame::{build, Direction, FrameParser, FrameType, Module};

fn bench_build(c: &mut Criterion) {
    let ft = FrameType::new(Direction::M2a, Module::Meter);
    let data = [0x00u8, 0x10, 0x00, 0x20];

    c.bench_function("frame_build", |b| {
        b.iter(|| build(black_box(ft), black_box(0x01), black_box(&data)).unwrap());
    });
}

fn bench_parse_single_frame(c: &mut Criterion) {
    let ft = FrameType::new(Direction::M2a, Module::Meter);
    let bytes = build(ft, 0x01, &[0x00, 0x10, 0x00, 0x20]).unwrap();

    c.bench_function("frame_parse_single", |b| {
        b.iter(|| {
            let mut parser = FrameParser::new();
            black_box(parser.feed(black_box(&bytes)))
        });
    });
}

fn bench_parse_burst(c: &mut Criterion) {
    let ft = FrameType::new(Direction::M2a, Module::Indicator);
    let mut stream = Vec::new();
    for cmd in 0..32u8 {
        stream.extend_from_slice(&build(ft, cmd, &[0xAA, 0xBB]).unwrap());
    }

    c.bench_function("frame_parse_burst_32", |b| {
        b.iter(|| {
            let mut parser = FrameParser::new();
            black_box(parser.feed(black_box(&stream)))
        });
    });
}

criterion_group!(benches, bench_build, bench_parse_single_frame, bench_parse_burst);
criterion_main!(benches);
