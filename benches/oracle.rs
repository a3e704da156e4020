use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use simverify::{EqualityOracle, SimTime, Snapshot, Verbosity};

fn make_snapshot(particles: usize) -> Snapshot {
    let positions: Vec<f64> = (0..particles * 3).map(|i| (i as f64).mul_add(0.25, 0.1).sin()).collect();
    let velocities: Vec<f64> = positions.iter().map(|x| x * -0.5).collect();
    Snapshot::builder(SimTime::from_millis(500))
        .doubles("positions", positions)
        .doubles("velocities", velocities)
        .ints("step_count", vec![50])
        .build()
}

fn bench_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("oracle_compare");
    let oracle = EqualityOracle::new(Verbosity::FirstDifference);
    for particles in [64usize, 1024, 16_384] {
        let left = make_snapshot(particles);
        let right = left.clone();
        group.throughput(Throughput::Elements((particles * 6) as u64));
        group.bench_with_input(BenchmarkId::new("equal", particles), &particles, |b, _| {
            b.iter(|| oracle.compare(&left, &right));
        });

        let last = particles * 3 - 1;
        let Some(diverged) = left.with_flipped_bit("velocities", last, 0) else {
            continue;
        };
        group.bench_with_input(BenchmarkId::new("last_entry_differs", particles), &particles, |b, _| {
            b.iter(|| oracle.compare(&left, &diverged));
        });
    }
    group.finish();
}

fn bench_digest(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_digest");
    for particles in [1024usize, 16_384] {
        let snapshot = make_snapshot(particles);
        group.throughput(Throughput::Bytes((particles * 6 * 8) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(particles), &snapshot, |b, s| {
            b.iter(|| s.digest());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compare, bench_digest);
criterion_main!(benches);
