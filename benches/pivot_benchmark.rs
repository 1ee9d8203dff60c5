use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use genoform::data::MutationEvent;
use genoform::matrix::{Aggregator, build_matrix};

fn synthetic_events(n: usize, samples: usize, biomarkers: usize) -> Vec<MutationEvent> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n)
        .map(|_| {
            MutationEvent::with_value(
                format!("TCGA-{:05}", rng.gen_range(0..samples)),
                format!("GENE{}", rng.gen_range(0..biomarkers)),
                rng.gen_range(0.0..1.0),
            )
        })
        .collect()
}

fn pivot_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_matrix");
    for &n in &[1_000usize, 10_000, 100_000] {
        let events = synthetic_events(n, n / 20 + 1, 200);
        group.bench_function(format!("sum_{n}"), |b| {
            b.iter(|| build_matrix(black_box(&events), Aggregator::Sum, None).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, pivot_benchmark);
criterion_main!(benches);
