use approx::assert_relative_eq;
use ndarray::{array, Array3, Axis};
use nuts_glm::{
    default_metrics, BayesGlm, CpuLogpFunc, Dataset, Draws, Family, GlmError, McmcEngine,
    MetricsOptions, PredictOptions, PredictionType, Reducer, SamplerSettings, SelectOptions,
    Trace, INTERNAL_NAMES,
};
use pretty_assertions::assert_eq;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Every draw equals `values`; internals are zero.
struct FixedEngine {
    values: Vec<f64>,
}

impl McmcEngine for FixedEngine {
    fn sample<F: CpuLogpFunc>(&self, logp: &F, settings: &SamplerSettings) -> anyhow::Result<Trace> {
        let parameters = logp.expanded_names();
        anyhow::ensure!(parameters.len() == self.values.len(), "wrong number of values");
        let internals: Vec<String> = INTERNAL_NAMES.iter().map(|s| s.to_string()).collect();
        let dim = parameters.len();
        let values = Array3::from_shape_fn(
            (settings.num_draws as usize, dim + internals.len(), settings.num_chains),
            |(_, i, _)| self.values.get(i).copied().unwrap_or(0.),
        );
        let labels = parameters.iter().chain(&internals).cloned().collect();
        Ok(Trace {
            draws: Draws::new(values, labels)?,
            parameters,
            internals,
        })
    }
}

fn quiet(num_draws: u64, num_chains: usize) -> SamplerSettings {
    SamplerSettings {
        num_draws,
        num_chains,
        quiet: true,
        ..Default::default()
    }
}

fn keep_all() -> PredictOptions {
    PredictOptions {
        select: SelectOptions {
            drop_warmup: 0,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn counts() -> Dataset {
    Dataset::new()
        .with_column("y", vec![0., 1., 1., 2., 3., 5., 4., 8.])
        .unwrap()
        .with_column("x", vec![1., 2., 3., 4., 5., 6., 7., 8.])
        .unwrap()
}

#[test]
fn expected_value_applies_inverse_link() {
    let cases: [(Family, Vec<f64>, fn(f64) -> f64); 4] = [
        (Family::Poisson, vec![0.5, 0.3], |eta: f64| eta.exp()),
        (Family::Bernoulli, vec![0.2, -1.1], |eta: f64| 1. / (1. + (-eta).exp())),
        (Family::NegativeBinomial, vec![0.5, 0.3, 0.4], |eta: f64| eta.exp()),
        (Family::Normal, vec![0.1, 0.9, 1.], |eta: f64| eta),
    ];
    for (family, values, inverse) in cases {
        let data = if family == Family::Bernoulli {
            Dataset::new()
                .with_column("y", vec![0., 1., 0., 1., 1., 0., 1., 1.])
                .unwrap()
                .with_column("x", vec![1., 2., 3., 4., 5., 6., 7., 8.])
                .unwrap()
        } else {
            counts()
        };
        let mut model = BayesGlm::new("y ~ x", &data, family, Default::default()).unwrap();
        model.fit_with(&FixedEngine { values }, &quiet(5, 2)).unwrap();
        let opts = keep_all();
        let linear = model
            .predict(None, PredictionType::Linpred, Some(Reducer::Mean), &opts)
            .unwrap();
        let expected = model
            .predict(None, PredictionType::Epred, Some(Reducer::Mean), &opts)
            .unwrap();
        assert_eq!(expected.shape(), &[8]);
        for (eta, mu) in linear.values().iter().zip(expected.values().iter()) {
            assert_relative_eq!(*mu, inverse(*eta), max_relative = 1e-12);
        }
        assert_eq!(model.link(), family.link());
    }
}

#[test]
fn predictive_draws_add_noise() {
    let mut model = BayesGlm::new("y ~ x", &counts(), Family::Poisson, Default::default()).unwrap();
    model
        .fit_with(&FixedEngine { values: vec![1., 0.3] }, &quiet(500, 2))
        .unwrap();
    let opts = keep_all();
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let predictive = model
        .posterior_predictive_with_rng(None, None, &opts, &mut rng)
        .unwrap();
    let expected = model.expected_value(None, None, &opts).unwrap();
    assert_eq!(predictive.shape(), &[1000, 8]);

    let spread = |values: &ndarray::ArrayD<f64>| values.std_axis(Axis(0), 1.);
    let noisy = spread(predictive.values());
    let smooth = spread(expected.values());
    for (n, s) in noisy.iter().zip(smooth.iter()) {
        assert!(n > s, "{n} <= {s}");
    }
    assert!(predictive.values().iter().all(|v| *v >= 0. && v.fract() == 0.));

    let mean_count = predictive.values().mean_axis(Axis(0)).unwrap();
    let mean_rate = expected.values().mean_axis(Axis(0)).unwrap();
    for (count, rate) in mean_count.iter().zip(mean_rate.iter()) {
        assert!((count - rate).abs() < 5. * (rate / 1000.).sqrt() + 0.05);
    }
}

#[test]
fn predictive_spread_exceeds_expected_spread_for_every_family() {
    for family in Family::ALL {
        let data = if family == Family::Bernoulli {
            Dataset::new()
                .with_column("y", vec![0., 1., 0., 0., 1., 0., 1., 1., 0., 1.])
                .unwrap()
                .with_column("x", (1..=10).map(f64::from).collect::<Vec<_>>())
                .unwrap()
        } else {
            Dataset::new()
                .with_column("y", vec![0., 1., 1., 2., 3., 5., 4., 8., 6., 9.])
                .unwrap()
                .with_column("x", (1..=10).map(f64::from).collect::<Vec<_>>())
                .unwrap()
        };
        let mut model = BayesGlm::new("y ~ x", &data, family, Default::default()).unwrap();
        model
            .fit(&SamplerSettings {
                seed: Some(17),
                num_draws: 600,
                num_chains: 2,
                quiet: true,
                ..Default::default()
            })
            .unwrap();
        let opts = PredictOptions::default();
        let mut rng = ChaCha8Rng::seed_from_u64(23);
        let predictive = model
            .posterior_predictive_with_rng(None, None, &opts, &mut rng)
            .unwrap();
        let expected = model.expected_value(None, None, &opts).unwrap();
        assert_eq!(predictive.shape(), &[800, 10]);

        let noisy = predictive.values().var_axis(Axis(0), 1.);
        let smooth = expected.values().var_axis(Axis(0), 1.);
        for (row, (n, s)) in noisy.iter().zip(smooth.iter()).enumerate() {
            assert!(n > s, "{family:?} row {row}: {n} <= {s}");
        }
    }
}

#[test]
fn seeded_predictions_repeat() {
    let mut model = BayesGlm::new("y ~ x", &counts(), Family::NegativeBinomial, Default::default()).unwrap();
    model
        .fit_with(&FixedEngine { values: vec![0.5, 0.3, 0.4] }, &quiet(20, 1))
        .unwrap();
    let draw = |seed| {
        model
            .predict_with_rng(
                None,
                PredictionType::Posterior,
                None,
                &keep_all(),
                &mut ChaCha8Rng::seed_from_u64(seed),
            )
            .unwrap()
    };
    assert_eq!(draw(1), draw(1));
    assert_eq!(
        "epred".parse::<PredictionType>().unwrap(),
        PredictionType::Epred
    );
    assert!(matches!(
        "mean".parse::<PredictionType>(),
        Err(GlmError::InvalidArgument(_))
    ));
}

#[test]
fn random_effects_are_rejected_before_sampling() {
    let data = counts()
        .with_column("g", vec![1., 1., 2., 2., 3., 3., 4., 4.])
        .unwrap();
    for formula in ["y ~ x + (1 | g)", "y ~ (x | g)"] {
        assert!(matches!(
            BayesGlm::new(formula, &data, Family::Poisson, Default::default()),
            Err(GlmError::RandomEffects(_))
        ));
    }
}

#[test]
fn invalid_outcomes() {
    let x = array![[1.], [2.], [3.]];
    let fractional = array![0.5, 1., 2.];
    assert!(matches!(
        BayesGlm::from_matrices(fractional.view(), x.view(), Family::Poisson, Default::default()),
        Err(GlmError::InvalidOutcome { .. })
    ));
    let not_binary = array![0., 1., 2.];
    assert!(matches!(
        BayesGlm::from_matrices(not_binary.view(), x.view(), Family::Bernoulli, Default::default()),
        Err(GlmError::InvalidOutcome { .. })
    ));
}

#[test]
fn logistic_regression_separates_classes() {
    let x: Vec<f64> = (1..=30).map(f64::from).collect();
    let y: Vec<f64> = x
        .iter()
        .map(|&v| if (v > 15.) ^ (v == 5. || v == 24.) { 1. } else { 0. })
        .collect();
    let data = Dataset::new()
        .with_column("y", y)
        .unwrap()
        .with_column("x", x)
        .unwrap();
    let mut model = BayesGlm::new("y ~ x", &data, Family::Bernoulli, Default::default()).unwrap();
    model
        .fit(&SamplerSettings {
            seed: Some(5),
            num_draws: 500,
            num_chains: 2,
            quiet: true,
            ..Default::default()
        })
        .unwrap();

    let metrics = model
        .calculate_metrics(
            &default_metrics(Family::Bernoulli),
            Some(Reducer::Mean),
            &MetricsOptions::default(),
        )
        .unwrap();
    let accuracy = metrics.get("accuracy").unwrap();
    let auc = metrics.get("auc").unwrap();
    assert!(accuracy.iter().all(|&a| a > 0.8), "{accuracy}");
    assert!(auc.iter().all(|&a| a > 0.85), "{auc}");

    let slope = model
        .get_parameters(&["x"], Some(Reducer::Median), &Default::default())
        .unwrap();
    assert!(slope.values().iter().all(|&b| b > 0.));
}
