use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use nuts_glm::{
    BayesGlm, Family, Parallelization, PredictOptions, PredictionType, Reducer, SamplerSettings,
};
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

fn make_model(n: usize, k: usize) -> BayesGlm {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let normal = Normal::new(0., 1.).unwrap();
    let x = Array2::from_shape_fn((n, k), |_| normal.sample(&mut rng));
    let noise: Array1<f64> = (0..n).map(|_| 0.5 * normal.sample(&mut rng)).collect();
    let beta = Array1::linspace(-1., 1., k);
    let y = x.dot(&beta) + noise + 2.;
    BayesGlm::from_matrices(y.view(), x.view(), Family::Normal, Default::default()).unwrap()
}

fn settings() -> SamplerSettings {
    SamplerSettings {
        num_draws: 300,
        num_tune: 300,
        num_chains: 2,
        seed: Some(1),
        quiet: true,
        parallelization: Parallelization::Serial,
        ..Default::default()
    }
}

fn criterion_benchmark(c: &mut Criterion) {
    for (n, k) in [(100, 3), (1000, 10)] {
        c.bench_function(&format!("fit normal {n}x{k}"), |b| {
            b.iter_batched(
                || make_model(n, k),
                |mut model| {
                    model.fit(black_box(&settings())).unwrap();
                },
                BatchSize::SmallInput,
            )
        });
    }

    let mut model = make_model(1000, 10);
    model.fit(&settings()).unwrap();
    let opts = PredictOptions::default();
    c.bench_function("epred mean 1000x10", |b| {
        b.iter(|| {
            model
                .predict(None, PredictionType::Epred, Some(Reducer::Mean), black_box(&opts))
                .unwrap()
        })
    });
    c.bench_function("posterior predictive 1000x10", |b| {
        b.iter_batched(
            || ChaCha8Rng::seed_from_u64(3),
            |mut rng| {
                model
                    .posterior_predictive_with_rng(None, None, black_box(&opts), &mut rng)
                    .unwrap()
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
