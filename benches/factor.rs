use std::hint::black_box;

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use ldlt_panel::{FactorConfig, factor};

struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9e3779b97f4a7c15 } else { seed },
        }
    }

    fn next_f64(&mut self) -> f64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        (x.wrapping_mul(0x2545f4914f6cdd1d) >> 11) as f64 / (1u64 << 53) as f64 - 0.5
    }
}

/// Lower-triangle symmetric panel with a boosted diagonal so the bench
/// measures the fast path without delayed pivots.
fn random_panel(m: usize, n: usize, seed: u64) -> Vec<f64> {
    let mut rng = XorShift64::new(seed);
    let mut a = vec![0.0; n * m];
    for j in 0..n {
        for i in j..m {
            a[j * m + i] = if i == j { m as f64 } else { rng.next_f64() };
        }
    }
    a
}

fn bench_factor(c: &mut Criterion) {
    let mut group = c.benchmark_group("ldlt/factor");
    let config = FactorConfig::default();

    for &(m, n) in &[(128usize, 128usize), (256, 256), (512, 256), (512, 512)] {
        let a = random_panel(m, n, 42);
        group.throughput(Throughput::Elements((n * n * (3 * m - n) / 6) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{m}x{n}")),
            &(m, n),
            |b, &(m, n)| {
                b.iter_batched(
                    || {
                        let perm: Vec<usize> = (0..n).collect();
                        let d = vec![0.0; 2 * n];
                        (a.clone(), perm, d)
                    },
                    |(mut a, mut perm, mut d)| {
                        let ne =
                            factor(m, n, &mut perm, &mut a, m, &mut d, &config).expect("factor");
                        black_box(ne);
                        black_box(a);
                    },
                    BatchSize::LargeInput,
                );
            },
        );
    }

    group.finish();
}

criterion_group!(ldlt, bench_factor);
criterion_main!(ldlt);
