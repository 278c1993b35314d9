//! Benchmarks for notification batching and lazy materialization
//!
//! - Coalescing: many writes to a few paths, delivered in one flush.
//! - Materialization: resolving one deep path in a wide tree, which should
//!   cost the same however many siblings stay plain data.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use canopy_core::notify::{PathNotifier, PathPattern};
use canopy_core::record;
use canopy_core::tree::{Path, Record, StateTree, Value};

fn bench_coalescing(c: &mut Criterion) {
    let mut group = c.benchmark_group("notifier_coalescing");

    for writes in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(writes), &writes, |b, &writes| {
            let (notifier, scheduler) = PathNotifier::manual();
            let _sub = notifier.subscribe(PathPattern::parse("**").unwrap(), |change| {
                black_box(change);
            });
            let paths: Vec<Path> = (0..8)
                .map(|i| Path::parse(&format!("items.{i}")).unwrap())
                .collect();

            b.iter(|| {
                for n in 0..writes {
                    let path = paths[n % paths.len()].clone();
                    notifier.notify(path, Some(Value::Int(n as i64)), None);
                }
                black_box(scheduler.run_pending());
            });
        });
    }

    group.finish();
}

fn wide_tree(width: usize) -> Record {
    let mut root = Record::new();
    for i in 0..width {
        root.insert(
            format!("section{i}"),
            Value::Record(record! {
                "title" => format!("section {i}"),
                "body" => record! { "text" => "lorem", "words" => 1 },
            }),
        );
    }
    root
}

fn bench_materialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("lazy_materialization");

    for width in [10usize, 1000] {
        let value = wide_tree(width);
        group.bench_with_input(BenchmarkId::from_parameter(width), &value, |b, value| {
            b.iter(|| {
                let tree = StateTree::new(value.clone()).unwrap();
                black_box(tree.cell("section0.body.words").unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_coalescing, bench_materialization);
criterion_main!(benches);
