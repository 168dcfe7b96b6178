// packages/engine/benches/index_bench.rs
//! Interval tree build and query throughput

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use domain_engine::IntervalTree;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn build_tree(n: usize) -> IntervalTree {
    let mut rng = StdRng::seed_from_u64(1);
    let mut tree = IntervalTree::new(n, 3).unwrap();
    for domain in 0..n {
        let extents: Vec<f64> = (0..3)
            .flat_map(|_| {
                let lo: f64 = rng.gen_range(0.0..100.0);
                [lo, lo + rng.gen_range(0.5..5.0)]
            })
            .collect();
        tree.add_domain(domain, &extents).unwrap();
    }
    tree.calculate(false).unwrap();
    tree
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("interval_tree_build");
    for n in [64, 1024, 16384] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| build_tree(black_box(n)))
        });
    }
    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let tree = build_tree(16384);

    c.bench_function("domains_in_range", |b| {
        b.iter(|| {
            tree.domains_in_range(black_box(&[40.0, 40.0, 40.0]), black_box(&[45.0, 45.0, 45.0]))
                .unwrap()
        })
    });

    c.bench_function("domains_for_equation", |b| {
        b.iter(|| {
            tree.domains_for_equation(black_box(&[1.0, 0.5, 0.0]), black_box(60.0))
                .unwrap()
        })
    });

    c.bench_function("domains_on_ray", |b| {
        b.iter(|| {
            tree.domains_on_ray(black_box(&[0.0, 50.0, 50.0]), black_box(&[1.0, 0.01, 0.0]))
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_build, bench_queries);
criterion_main!(benches);
