//! Leave-one-out cross-validation with Pareto smoothed importance sampling.
//!
//! Importance ratios of every observation are `1 / p(y_i | theta_s)`; the
//! largest ones are replaced by quantiles of a generalized Pareto
//! distribution fitted to the tail, whose shape `k` doubles as a
//! reliability diagnostic (values above 0.7 mean the estimate of that
//! observation cannot be trusted).

use std::fmt;

use log::warn;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rayon::prelude::*;

use crate::draws::{mean, SelectOptions};
use crate::error::{GlmError, Result};
use crate::math::log_sum_exp;
use crate::model::BayesGlm;
use crate::predict::PredictOptions;

const PARETO_K_WARN: f64 = 0.7;

/// Pointwise log-likelihood, indexed (observation, draw).
#[derive(Debug, Clone, PartialEq)]
pub struct LogLikelihood {
    pub values: Array2<f64>,
    /// Chains are concatenated along the draw axis.
    pub chains_merged: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LooResult {
    pub elpd_loo: f64,
    pub se_elpd_loo: f64,
    pub p_loo: f64,
    pub looic: f64,
    /// Per-observation contributions to `elpd_loo`.
    pub pointwise: Array1<f64>,
    pub pareto_k: Array1<f64>,
}

impl LooResult {
    /// Observations whose Pareto `k` exceeds the reliability threshold.
    pub fn unreliable(&self) -> Vec<usize> {
        self.pareto_k
            .iter()
            .enumerate()
            .filter(|(_, &k)| k > PARETO_K_WARN)
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LooComparisonRow {
    pub name: String,
    pub elpd_loo: f64,
    /// Difference to the best model, zero for the best one.
    pub elpd_diff: f64,
    pub se_diff: f64,
    pub p_loo: f64,
    pub looic: f64,
}

/// Models ordered by decreasing `elpd_loo`.
#[derive(Debug, Clone, PartialEq)]
pub struct LooComparison {
    pub rows: Vec<LooComparisonRow>,
}

impl LooComparison {
    pub fn best(&self) -> Option<&LooComparisonRow> {
        self.rows.first()
    }
}

impl fmt::Display for LooComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<16} {:>12} {:>12} {:>10} {:>10} {:>12}",
            "model", "elpd_loo", "elpd_diff", "se_diff", "p_loo", "looic"
        )?;
        for row in &self.rows {
            write!(
                f,
                "\n{:<16} {:>12.2} {:>12.2} {:>10.2} {:>10.2} {:>12.2}",
                row.name, row.elpd_loo, row.elpd_diff, row.se_diff, row.p_loo, row.looic
            )?;
        }
        Ok(())
    }
}

/// Computes and compares approximate leave-one-out fits.
pub trait LooEngine {
    fn psis_loo(&self, log_lik: &LogLikelihood) -> Result<LooResult>;

    fn loo_compare(&self, results: &[LooResult], names: &[String]) -> Result<LooComparison> {
        compare_results(results, names)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PsisLoo;

impl LooEngine for PsisLoo {
    fn psis_loo(&self, log_lik: &LogLikelihood) -> Result<LooResult> {
        let (num_obs, num_draws) = log_lik.values.dim();
        if num_obs == 0 || num_draws < 2 {
            return Err(GlmError::InvalidArgument(format!(
                "loo needs at least one observation and two draws, got {num_obs} x {num_draws}"
            )));
        }
        if log_lik.values.iter().any(|v| v.is_nan()) {
            return Err(GlmError::Numerical(
                "log-likelihood contains NaN".to_string(),
            ));
        }

        let rows: Vec<_> = log_lik.values.axis_iter(Axis(0)).collect();
        let pointwise: Vec<(f64, f64, f64)> = rows
            .into_par_iter()
            .map(|ll| {
                let mut log_weights: Vec<f64> = ll.iter().map(|v| -v).collect();
                let k = psis_smooth(&mut log_weights);
                let elpd = log_sum_exp(log_weights.iter().zip(ll).map(|(w, l)| w + l));
                let lpd = log_sum_exp(ll.iter().copied()) - (num_draws as f64).ln();
                (elpd, lpd - elpd, k)
            })
            .collect();

        let elpd: Array1<f64> = pointwise.iter().map(|p| p.0).collect();
        let pareto_k: Array1<f64> = pointwise.iter().map(|p| p.2).collect();
        let p_loo: f64 = pointwise.iter().map(|p| p.1).sum();
        let elpd_loo = elpd.sum();

        let bad = pareto_k.iter().filter(|&&k| k > PARETO_K_WARN).count();
        if bad > 0 {
            warn!("{bad} of {num_obs} observations have pareto k > {PARETO_K_WARN}; the loo estimate is unreliable");
        }

        Ok(LooResult {
            elpd_loo,
            se_elpd_loo: total_se(elpd.view()),
            p_loo,
            looic: -2. * elpd_loo,
            pointwise: elpd,
            pareto_k,
        })
    }
}

/// `sqrt(n var(x))` with the sample variance; the standard error of a sum
/// of pointwise terms.
fn total_se(values: ArrayView1<f64>) -> f64 {
    let n = values.len() as f64;
    if values.len() < 2 {
        return 0.;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1.);
    (n * var).sqrt()
}

fn compare_results(results: &[LooResult], names: &[String]) -> Result<LooComparison> {
    if results.len() != names.len() {
        return Err(GlmError::DimensionMismatch {
            context: "model names",
            expected: results.len(),
            actual: names.len(),
        });
    }
    let Some(first) = results.first() else {
        return Ok(LooComparison { rows: Vec::new() });
    };
    if let Some(other) = results.iter().find(|r| r.pointwise.len() != first.pointwise.len()) {
        return Err(GlmError::DimensionMismatch {
            context: "observations compared by loo",
            expected: first.pointwise.len(),
            actual: other.pointwise.len(),
        });
    }

    let mut order: Vec<usize> = (0..results.len()).collect();
    order.sort_by(|&a, &b| results[b].elpd_loo.total_cmp(&results[a].elpd_loo));
    let best = &results[order[0]];
    let rows = order
        .into_iter()
        .map(|i| {
            let result = &results[i];
            let diff = &result.pointwise - &best.pointwise;
            LooComparisonRow {
                name: names[i].clone(),
                elpd_loo: result.elpd_loo,
                elpd_diff: result.elpd_loo - best.elpd_loo,
                se_diff: total_se(diff.view()),
                p_loo: result.p_loo,
                looic: result.looic,
            }
        })
        .collect();
    Ok(LooComparison { rows })
}

/// Smooth the tail of one observation's log importance weights in place and
/// normalize them. Returns the Pareto shape estimate.
fn psis_smooth(log_weights: &mut [f64]) -> f64 {
    let num_draws = log_weights.len();
    let max = log_weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    log_weights.iter_mut().for_each(|w| *w -= max);

    let tail_len = (0.2 * num_draws as f64)
        .min(3. * (num_draws as f64).sqrt())
        .ceil() as usize;
    let k = if tail_len < 5 || tail_len >= num_draws {
        f64::INFINITY
    } else {
        smooth_tail(log_weights, tail_len)
    };

    // truncate at the largest raw weight
    log_weights.iter_mut().for_each(|w| *w = w.min(0.));
    let total = log_sum_exp(log_weights.iter().copied());
    log_weights.iter_mut().for_each(|w| *w -= total);
    k
}

fn smooth_tail(log_weights: &mut [f64], tail_len: usize) -> f64 {
    let mut order: Vec<usize> = (0..log_weights.len()).collect();
    order.sort_by(|&a, &b| log_weights[b].total_cmp(&log_weights[a]));
    let cutoff = log_weights[order[tail_len]];
    // ascending
    let tail: Vec<usize> = order[..tail_len].iter().rev().copied().collect();
    if log_weights[tail[tail_len - 1]] <= cutoff {
        return 0.;
    }

    let exp_cutoff = cutoff.exp();
    let excess: Vec<f64> = tail.iter().map(|&i| log_weights[i].exp() - exp_cutoff).collect();
    let (k, sigma) = gpd_fit(&excess);
    if k.is_finite() {
        for (rank, &i) in tail.iter().enumerate() {
            let p = (rank as f64 + 0.5) / tail_len as f64;
            log_weights[i] = (gpd_quantile(p, k, sigma) + exp_cutoff).ln();
        }
    }
    k
}

/// Quantile function of the generalized Pareto distribution at location zero.
fn gpd_quantile(p: f64, k: f64, sigma: f64) -> f64 {
    if k.abs() < 1e-12 {
        -sigma * (-p).ln_1p()
    } else {
        sigma * (-k * (-p).ln_1p()).exp_m1() / k
    }
}

/// Empirical Bayes estimate of the generalized Pareto shape and scale
/// (Zhang and Stephens 2009), with a weakly informative prior pulling the
/// shape towards 0.5. `x` must be sorted ascending and positive.
fn gpd_fit(x: &[f64]) -> (f64, f64) {
    const PRIOR: f64 = 3.;
    let n = x.len();
    let nf = n as f64;
    let grid = 30 + nf.sqrt() as usize;
    let quartile = x[((nf / 4. + 0.5).floor() as usize).saturating_sub(1)];
    let largest = x[n - 1];

    let theta: Vec<f64> = (1..=grid)
        .map(|j| 1. / largest + (1. - (grid as f64 / (j as f64 - 0.5)).sqrt()) / PRIOR / quartile)
        .collect();
    let profile: Vec<f64> = theta
        .iter()
        .map(|&t| {
            let k = x.iter().map(|&v| (-t * v).ln_1p()).sum::<f64>() / nf;
            nf * ((-t / k).ln() - k - 1.)
        })
        .collect();
    let norm = log_sum_exp(profile.iter().copied());
    let theta_hat: f64 = theta
        .iter()
        .zip(&profile)
        .map(|(t, l)| t * (l - norm).exp())
        .filter(|v| v.is_finite())
        .sum();

    let k = x.iter().map(|&v| (-theta_hat * v).ln_1p()).sum::<f64>() / nf;
    let sigma = -k / theta_hat;
    let k = k * nf / (nf + 10.) + 10. * 0.5 / (nf + 10.);
    if k.is_nan() {
        (f64::INFINITY, sigma)
    } else {
        (k, sigma)
    }
}

impl BayesGlm {
    /// Pointwise log-likelihood of the training data on the scale of the
    /// raw outcome, with chains concatenated chain-major.
    pub fn log_likelihood(&self, select: &SelectOptions) -> Result<LogLikelihood> {
        let opts = PredictOptions {
            standardized_output: true,
            transform_input: Some(false),
            select: SelectOptions {
                collapse: true,
                ..*select
            },
        };
        let eta = self.linear_chains(None, &opts)?;
        let posterior = self.posterior()?;
        let window = posterior.samples.window(&opts.select)?;
        let names = self.layout().display_names();
        let aux_positions = self
            .layout()
            .auxiliary()
            .map(|slot| {
                posterior
                    .samples
                    .position(&names[slot])
                    .ok_or_else(|| GlmError::UnknownParameter(names[slot].clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        let family = self.family();
        let y = self.outcome_std();
        let jacobian = self.scaling().sigma_y.ln();
        let (draws, num_obs, chains) = eta.dim();
        let mut values = Array2::zeros((num_obs, draws * chains));
        let mut aux = vec![0f64; aux_positions.len()];
        for chain in 0..chains {
            for draw in 0..draws {
                for (a, &pos) in aux.iter_mut().zip(&aux_positions) {
                    *a = window[[draw, pos, chain]];
                }
                let column = chain * draws + draw;
                for obs in 0..num_obs {
                    values[[obs, column]] =
                        family.log_likelihood(y[obs], eta[[draw, obs, chain]], &aux) - jacobian;
                }
            }
        }
        Ok(LogLikelihood {
            values,
            chains_merged: true,
        })
    }

    /// Compare models by PSIS-LOO. Models are named `model_1`, `model_2`, …
    /// unless `names` is given.
    pub fn compare(models: &[&BayesGlm], names: Option<&[String]>) -> Result<LooComparison> {
        Self::compare_with(&PsisLoo, models, names)
    }

    pub fn compare_with<L: LooEngine>(
        engine: &L,
        models: &[&BayesGlm],
        names: Option<&[String]>,
    ) -> Result<LooComparison> {
        let names = match names {
            Some(names) => names.to_vec(),
            None => (1..=models.len()).map(|i| format!("model_{i}")).collect(),
        };
        let results = models
            .iter()
            .map(|model| engine.psis_loo(&model.log_likelihood(&SelectOptions::default())?))
            .collect::<Result<Vec<_>>>()?;
        engine.loo_compare(&results, &names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::Family;
    use crate::model::test_engine::{cars, settings, StubEngine};
    use crate::parameters::AccessOptions;
    use approx::assert_relative_eq;
    use ndarray::array;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    /// Log-likelihood of `n` unit-variance observations under the exact
    /// posterior of their mean.
    fn normal_mean_log_lik(n: usize, draws: usize, seed: u64) -> LogLikelihood {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let y: Vec<f64> = (0..n).map(|_| Normal::new(1., 1.).unwrap().sample(&mut rng)).collect();
        let y_bar = y.iter().sum::<f64>() / n as f64;
        let posterior = Normal::new(y_bar, 1. / (n as f64).sqrt()).unwrap();
        let mu: Vec<f64> = (0..draws).map(|_| posterior.sample(&mut rng)).collect();
        let values = Array2::from_shape_fn((n, draws), |(i, s)| {
            -0.5 * (y[i] - mu[s]).powi(2) - 0.5 * (2. * std::f64::consts::PI).ln()
        });
        LogLikelihood {
            values,
            chains_merged: true,
        }
    }

    #[test]
    fn well_behaved_posterior_has_small_k() {
        let ll = normal_mean_log_lik(100, 4000, 42);
        let loo = PsisLoo.psis_loo(&ll).unwrap();
        assert!(loo.unreliable().is_empty(), "{:?}", loo.pareto_k);
        assert!(loo.pareto_k.iter().all(|&k| k < 0.5));
        // one free parameter
        assert!(loo.p_loo > 0.5 && loo.p_loo < 2., "{}", loo.p_loo);
        assert_relative_eq!(loo.looic, -2. * loo.elpd_loo);
        assert_relative_eq!(loo.pointwise.sum(), loo.elpd_loo, max_relative = 1e-12);
        assert!(loo.se_elpd_loo > 0.);
    }

    #[test]
    fn constant_log_likelihood() {
        let ll = LogLikelihood {
            values: Array2::from_elem((3, 100), -1.5),
            chains_merged: true,
        };
        let loo = PsisLoo.psis_loo(&ll).unwrap();
        assert_eq!(loo.pareto_k, array![0., 0., 0.]);
        assert_relative_eq!(loo.elpd_loo, -4.5, epsilon = 1e-12);
        assert_relative_eq!(loo.p_loo, 0., epsilon = 1e-12);
        assert_relative_eq!(loo.se_elpd_loo, 0., epsilon = 1e-12);
    }

    #[test]
    fn too_few_draws() {
        let ll = LogLikelihood {
            values: Array2::zeros((2, 1)),
            chains_merged: true,
        };
        assert!(matches!(
            PsisLoo.psis_loo(&ll),
            Err(GlmError::InvalidArgument(_))
        ));
    }

    #[test]
    fn pareto_fit_recovers_shape() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let uniform = rand_distr::Uniform::new(0f64, 1.).unwrap();
        let mut x: Vec<f64> = (0..4000)
            .map(|_| gpd_quantile(uniform.sample(&mut rng), 0.5, 2.))
            .collect();
        x.sort_by(f64::total_cmp);
        let (k, sigma) = gpd_fit(&x);
        assert!((k - 0.5).abs() < 0.1, "{k}");
        assert!((sigma - 2.).abs() < 0.3, "{sigma}");
    }

    #[test]
    fn quantiles_of_exponential_limit() {
        assert_relative_eq!(gpd_quantile(0.5, 0., 1.), 2f64.ln());
        assert_relative_eq!(gpd_quantile(0.5, 1e-9, 1.), 2f64.ln(), epsilon = 1e-8);
        // k = 1: sigma * p / (1 - p)
        assert_relative_eq!(gpd_quantile(0.75, 1., 2.), 6., epsilon = 1e-12);
    }

    fn result(elpd: Array1<f64>) -> LooResult {
        let elpd_loo = elpd.sum();
        LooResult {
            elpd_loo,
            se_elpd_loo: total_se(elpd.view()),
            p_loo: 1.,
            looic: -2. * elpd_loo,
            pareto_k: Array1::zeros(elpd.len()),
            pointwise: elpd,
        }
    }

    #[test]
    fn comparison_orders_by_elpd() {
        let worse = result(array![-1., -2., -3.]);
        let better = result(array![-1., -1., -1.]);
        let names = vec!["a".to_string(), "b".to_string()];
        let table = PsisLoo.loo_compare(&[worse, better], &names).unwrap();
        assert_eq!(table.best().unwrap().name, "b");
        assert_eq!(table.rows[0].elpd_diff, 0.);
        assert_eq!(table.rows[0].se_diff, 0.);
        assert_relative_eq!(table.rows[1].elpd_diff, -3.);
        // differences 0, -1, -2
        assert_relative_eq!(table.rows[1].se_diff, 3f64.sqrt(), epsilon = 1e-12);
        assert!(table.to_string().starts_with("model"));

        assert!(matches!(
            PsisLoo.loo_compare(&[result(array![-1.])], &names),
            Err(GlmError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            PsisLoo.loo_compare(
                &[result(array![-1.]), result(array![-1., -2.])],
                &names
            ),
            Err(GlmError::DimensionMismatch { .. })
        ));
    }

    fn wiggly(d: usize, i: usize, c: usize) -> f64 {
        let noise = ((d * 37 + c * 11 + i * 5) % 17) as f64 / 170.;
        match i {
            0 => noise,
            1 => -0.8 + noise,
            _ => 0.5 + noise,
        }
    }

    #[test]
    fn log_likelihood_on_raw_scale() {
        let mut model = BayesGlm::new("mpg ~ wt", &cars(), Family::Normal, Default::default()).unwrap();
        model.fit_with(&StubEngine { value: wiggly }, &settings(30, 2)).unwrap();
        let select = SelectOptions {
            drop_warmup: 10,
            collapse: false,
            ..Default::default()
        };
        let ll = model.log_likelihood(&select).unwrap();
        assert_eq!(ll.values.dim(), (10, 40));
        assert!(ll.chains_merged);

        let raw = model
            .parameters(
                None,
                &AccessOptions {
                    select: SelectOptions {
                        drop_warmup: 10,
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap();
        let raw = raw.values();
        let wt = cars().column("wt").unwrap().to_owned();
        let y = model.outcome();
        // draw 5 of chain 1
        let column = 20 + 5;
        let (alpha, beta, sigma) = (
            raw[&[column, 0][..]],
            raw[&[column, 1][..]],
            raw[&[column, 2][..]],
        );
        for obs in 0..10 {
            let expected = Family::Normal.log_likelihood(y[obs], alpha + beta * wt[obs], &[sigma]);
            assert_relative_eq!(ll.values[[obs, column]], expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn compare_fitted_models() {
        let mut small = BayesGlm::new("mpg ~ wt", &cars(), Family::Normal, Default::default()).unwrap();
        small.fit_with(&StubEngine { value: wiggly }, &settings(300, 2)).unwrap();
        let mut large =
            BayesGlm::new("mpg ~ wt + hp", &cars(), Family::Normal, Default::default()).unwrap();
        large.fit_with(&StubEngine { value: wiggly }, &settings(300, 2)).unwrap();

        let table = BayesGlm::compare(&[&small, &large], None).unwrap();
        assert_eq!(table.rows.len(), 2);
        let mut names: Vec<_> = table.rows.iter().map(|r| r.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["model_1", "model_2"]);
        assert!(table.rows[0].elpd_loo >= table.rows[1].elpd_loo);

        let unfit = BayesGlm::new("mpg ~ wt", &cars(), Family::Normal, Default::default()).unwrap();
        assert!(matches!(
            BayesGlm::compare(&[&small, &unfit], None),
            Err(GlmError::NotFitted)
        ));
    }
}
