//! Benchmarks for the regex-to-graph compile pipeline.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use oclgrep::regexp::compile;
use oclgrep::text::to_utf32;

fn bench_compile_literal(c: &mut Criterion) {
    let pattern = to_utf32("some longer literal word");
    c.bench_function("compile_literal", |b| {
        b.iter(|| compile(black_box(&pattern)).unwrap())
    });
}

fn bench_compile_classes(c: &mut Criterion) {
    let pattern = to_utf32("[a-zA-Z0-9_]+[0-9]{2,4}[x-z]?");
    c.bench_function("compile_classes", |b| {
        b.iter(|| compile(black_box(&pattern)).unwrap())
    });
}

fn bench_compile_wide_multiplier(c: &mut Criterion) {
    // unrolling-heavy pattern: 128 chained copies
    let pattern = to_utf32("[a-f]{128}");
    c.bench_function("compile_wide_multiplier", |b| {
        b.iter(|| compile(black_box(&pattern)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_compile_literal,
    bench_compile_classes,
    bench_compile_wide_multiplier
);
criterion_main!(benches);
