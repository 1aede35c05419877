//! Benchmarks for synchronous propagation
//!
//! Run with: cargo bench -p nucleus-core

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use nucleus_core::{atom, derived, Atom, DerivedAtom, ValueAtom};
use std::hint::black_box;

// ============================================================================
// Value atoms
// ============================================================================

fn bench_value_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("value/update");

    for listeners in [0usize, 1, 16, 256] {
        let x = atom(0u64);
        let unsubs: Vec<_> = (0..listeners)
            .map(|_| x.subscribe(|v| {
                black_box(v);
            }))
            .collect();

        group.bench_with_input(BenchmarkId::new("listeners", listeners), &(), |b, _| {
            b.iter(|| x.update(|v| v.wrapping_add(1)))
        });

        drop(unsubs);
    }

    group.finish();
}

// ============================================================================
// Derived chains and fans
// ============================================================================

fn build_chain(depth: usize) -> (ValueAtom<u64>, DerivedAtom<u64>) {
    let root = atom(0u64);
    let r = root.clone();
    let mut tail = derived(move |get| get.get(&r) + 1);
    for _ in 1..depth {
        let prev = tail.clone();
        tail = derived(move |get| get.get(&prev) + 1);
    }
    (root, tail)
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("derived/chain");

    for depth in [1usize, 10, 100] {
        let (root, tail) = build_chain(depth);
        group.bench_with_input(BenchmarkId::new("depth", depth), &(), |b, _| {
            b.iter(|| {
                root.update(|v| v + 1);
                black_box(tail.get_value());
            })
        });
    }

    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("derived/fan_out");

    for width in [10usize, 100, 1000] {
        let root = atom(0u64);
        let leaves: Vec<_> = (0..width as u64)
            .map(|i| {
                let r = root.clone();
                derived(move |get| get.get(&r) * i)
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("width", width), &(), |b, _| {
            b.iter(|| {
                root.update(|v| v + 1);
                black_box(leaves.len());
            })
        });
    }

    group.finish();
}

fn bench_diamond(c: &mut Criterion) {
    let base = atom(0i64);
    let b1 = base.clone();
    let left = derived(move |get| get.get(&b1) + 1);
    let b2 = base.clone();
    let right = derived(move |get| get.get(&b2) * 2);
    let (l, r) = (left.clone(), right.clone());
    let sum = derived(move |get| get.get(&l) + get.get(&r));

    c.bench_function("derived/diamond", |b| {
        b.iter(|| {
            base.update(|v| v + 1);
            black_box(sum.get_value());
        })
    });
}

criterion_group!(
    benches,
    bench_value_update,
    bench_chain,
    bench_fan_out,
    bench_diamond
);
criterion_main!(benches);
