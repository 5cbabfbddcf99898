//! Convergence diagnostics for multi-chain draws.
//!
//! R-hat and the effective sample sizes follow the rank-normalized split
//! chain definitions of Vehtari et al. (2021): every chain is split in
//! half, draws are replaced by normal scores of their pooled ranks, and
//! the effective sample size uses Geyer's initial monotone sequence.

use std::fmt;

use log::{info, warn};
use ndarray::{s, Array2, ArrayView1, ArrayView2, Axis};
use statrs::function::erf::erfc_inv;

use crate::draws::{mean, quantile, sample_std, Draws};
use crate::error::Result;
use crate::math::average_ranks;

/// Convergence summary of one quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSummary {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    /// Maximum of the bulk and tail rank-normalized split R-hat.
    pub rhat: f64,
    pub ess_bulk: f64,
    pub ess_tail: f64,
    pub mcse_mean: f64,
}

impl ParameterSummary {
    /// Monte Carlo standard error of the mean relative to the posterior sd.
    pub fn relative_mcse(&self) -> f64 {
        self.mcse_mean / self.sd
    }
}

/// Summarize the named labels of `draws` over all stored draws and chains.
///
/// Diagnostics that need more draws than are available (fewer than four
/// per chain) are reported as NaN.
///
/// # Errors
///
/// Returns [`crate::GlmError::UnknownParameter`] for a name that is not a label.
pub fn summarize(draws: &Draws, names: &[String]) -> Result<Vec<ParameterSummary>> {
    let subset = draws.subset(names)?;
    let values = subset.values();
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let chains = values.index_axis(Axis(1), i);
            Ok(summarize_one(name, chains))
        })
        .collect()
}

/// `chains` is indexed (draw, chain).
fn summarize_one(name: &str, chains: ArrayView2<f64>) -> ParameterSummary {
    let pooled: Vec<f64> = chains.t().iter().copied().collect();
    let pooled = ArrayView1::from(&pooled[..]);
    let mean = if pooled.is_empty() {
        f64::NAN
    } else {
        mean(pooled)
    };
    let sd = sample_std(pooled);

    let split = split_chains(chains);
    let (rhat, ess_bulk, ess_tail, ess_mean) = match split {
        Some(split) => {
            let ranked = rank_normalize(split.view());
            let folded = fold(split.view());
            let rhat = rhat_of(ranked.view()).max(rhat_of(rank_normalize(folded.view()).view()));
            let ess_bulk = ess_of(ranked.view());
            let lower = quantile(pooled, 0.05);
            let upper = quantile(pooled, 0.95);
            let ess_tail = ess_of(indicator(split.view(), lower).view())
                .min(ess_of(indicator(split.view(), upper).view()));
            (rhat, ess_bulk, ess_tail, ess_of(split.view()))
        }
        None => (f64::NAN, f64::NAN, f64::NAN, f64::NAN),
    };

    ParameterSummary {
        name: name.to_string(),
        mean,
        sd,
        rhat,
        ess_bulk,
        ess_tail,
        mcse_mean: sd / ess_mean.sqrt(),
    }
}

/// Split every chain into two halves; the middle draw of an odd chain is dropped.
fn split_chains(chains: ArrayView2<f64>) -> Option<Array2<f64>> {
    let (n, m) = chains.dim();
    let half = n / 2;
    if half < 2 || m == 0 {
        return None;
    }
    let mut out = Array2::zeros((half, 2 * m));
    for (c, chain) in chains.axis_iter(Axis(1)).enumerate() {
        out.column_mut(2 * c).assign(&chain.slice(s![..half]));
        out.column_mut(2 * c + 1).assign(&chain.slice(s![n - half..]));
    }
    Some(out)
}

fn normal_quantile(p: f64) -> f64 {
    -std::f64::consts::SQRT_2 * erfc_inv(2. * p)
}

/// Replace every value by the normal score of its average pooled rank.
fn rank_normalize(values: ArrayView2<f64>) -> Array2<f64> {
    let flat: Vec<f64> = values.iter().copied().collect();
    let count = flat.len();
    let ranks = average_ranks(&flat);

    let scale = count as f64 + 0.25;
    let mut out = Array2::zeros(values.raw_dim());
    for (out, rank) in out.iter_mut().zip(ranks) {
        *out = normal_quantile((rank - 0.375) / scale);
    }
    out
}

/// Absolute deviation from the pooled median.
fn fold(values: ArrayView2<f64>) -> Array2<f64> {
    let flat: Vec<f64> = values.iter().copied().collect();
    let median = quantile(ArrayView1::from(&flat[..]), 0.5);
    values.mapv(|v| (v - median).abs())
}

fn indicator(values: ArrayView2<f64>, cut: f64) -> Array2<f64> {
    values.mapv(|v| if v <= cut { 1. } else { 0. })
}

/// Potential scale reduction of (draw, chain) values.
fn rhat_of(values: ArrayView2<f64>) -> f64 {
    let (n, m) = values.dim();
    let n_f = n as f64;
    let chain_means: Vec<f64> = values.axis_iter(Axis(1)).map(mean).collect();
    let within = values
        .axis_iter(Axis(1))
        .map(|c| sample_std(c).powi(2))
        .sum::<f64>()
        / m as f64;
    let between = n_f * sample_std(ArrayView1::from(&chain_means[..])).powi(2);
    let var_plus = (n_f - 1.) / n_f * within + between / n_f;
    (var_plus / within).sqrt()
}

/// Biased autocovariance at `lag` (denominator n).
fn autocovariance(chain: ArrayView1<f64>, chain_mean: f64, lag: usize) -> f64 {
    let n = chain.len();
    let sum: f64 = (0..n - lag)
        .map(|i| (chain[i] - chain_mean) * (chain[i + lag] - chain_mean))
        .sum();
    sum / n as f64
}

/// Multi-chain effective sample size of (draw, chain) values.
fn ess_of(values: ArrayView2<f64>) -> f64 {
    let (n, m) = values.dim();
    if n < 4 || m == 0 {
        return f64::NAN;
    }
    let n_f = n as f64;
    let means: Vec<f64> = values.axis_iter(Axis(1)).map(mean).collect();
    let mean_acov = |lag: usize| {
        values
            .axis_iter(Axis(1))
            .zip(&means)
            .map(|(chain, &mu)| autocovariance(chain, mu, lag))
            .sum::<f64>()
            / m as f64
    };

    let within = mean_acov(0) * n_f / (n_f - 1.);
    let mut var_plus = within * (n_f - 1.) / n_f;
    if m > 1 {
        var_plus += sample_std(ArrayView1::from(&means[..])).powi(2);
    }
    if !(var_plus > 0. && var_plus.is_finite()) {
        return f64::NAN;
    }
    let rho = |lag: usize| 1. - (within - mean_acov(lag)) / var_plus;

    let mut rho_hat = vec![0f64; n];
    rho_hat[0] = 1.;
    let mut rho_even = 1.;
    let mut rho_odd = rho(1);
    rho_hat[1] = rho_odd;

    // Geyer's initial positive sequence
    let mut t = 1;
    while t < n - 4 && rho_even + rho_odd > 0. {
        rho_even = rho(t + 1);
        rho_odd = rho(t + 2);
        if rho_even + rho_odd >= 0. {
            rho_hat[t + 1] = rho_even;
            rho_hat[t + 2] = rho_odd;
        }
        t += 2;
    }
    let max_t = t;
    if rho_even > 0. {
        rho_hat[max_t + 1] = rho_even;
    }

    // and make it monotone
    let mut t = 1;
    while t + 3 <= max_t {
        if rho_hat[t + 1] + rho_hat[t + 2] > rho_hat[t - 1] + rho_hat[t] {
            rho_hat[t + 1] = (rho_hat[t - 1] + rho_hat[t]) / 2.;
            rho_hat[t + 2] = rho_hat[t + 1];
        }
        t += 2;
    }

    let total = (m * n) as f64;
    let tau: f64 = -1. + 2. * rho_hat[..=max_t].iter().sum::<f64>() + rho_hat[max_t + 1];
    total / tau.max(1. / total.log10())
}

/// Levels at which a diagnostic is reported.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceThresholds {
    pub rhat_warn: f64,
    pub rhat_info: f64,
    pub ess_warn: f64,
    pub ess_info: f64,
    /// Monte Carlo standard error relative to the posterior sd.
    pub mcse_warn: f64,
    pub mcse_info: f64,
}

impl Default for ConvergenceThresholds {
    fn default() -> Self {
        Self {
            rhat_warn: 1.05,
            rhat_info: 1.01,
            ess_warn: 100.,
            ess_info: 250.,
            mcse_warn: 0.05,
            mcse_info: 0.01,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    Rhat,
    EssBulk,
    EssTail,
    RelativeMcse,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Diagnostic::Rhat => "rhat",
            Diagnostic::EssBulk => "bulk ESS",
            Diagnostic::EssTail => "tail ESS",
            Diagnostic::RelativeMcse => "relative MCSE",
        })
    }
}

/// A diagnostic of one parameter that crossed a threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceIssue {
    pub parameter: String,
    pub diagnostic: Diagnostic,
    pub value: f64,
    pub severity: Severity,
}

impl fmt::Display for ConvergenceIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} is {:.3}",
            self.diagnostic, self.parameter, self.value
        )
    }
}

fn classify(value: f64, warn: f64, info: f64, larger_is_worse: bool) -> Option<Severity> {
    if !value.is_finite() {
        return None;
    }
    let crosses = |limit: f64| {
        if larger_is_worse {
            value > limit
        } else {
            value < limit
        }
    };
    if crosses(warn) {
        Some(Severity::Warning)
    } else if crosses(info) {
        Some(Severity::Info)
    } else {
        None
    }
}

/// Every threshold crossing in `summaries`, in parameter order.
///
/// Non-finite diagnostics are skipped.
pub fn check_convergence(
    summaries: &[ParameterSummary],
    thresholds: &ConvergenceThresholds,
) -> Vec<ConvergenceIssue> {
    let mut issues = Vec::new();
    for summary in summaries {
        let checks = [
            (
                Diagnostic::Rhat,
                summary.rhat,
                classify(summary.rhat, thresholds.rhat_warn, thresholds.rhat_info, true),
            ),
            (
                Diagnostic::EssBulk,
                summary.ess_bulk,
                classify(summary.ess_bulk, thresholds.ess_warn, thresholds.ess_info, false),
            ),
            (
                Diagnostic::EssTail,
                summary.ess_tail,
                classify(summary.ess_tail, thresholds.ess_warn, thresholds.ess_info, false),
            ),
            (
                Diagnostic::RelativeMcse,
                summary.relative_mcse(),
                classify(
                    summary.relative_mcse(),
                    thresholds.mcse_warn,
                    thresholds.mcse_info,
                    true,
                ),
            ),
        ];
        for (diagnostic, value, severity) in checks {
            if let Some(severity) = severity {
                issues.push(ConvergenceIssue {
                    parameter: summary.name.clone(),
                    diagnostic,
                    value,
                    severity,
                });
            }
        }
    }
    issues
}

pub(crate) fn log_issues(issues: &[ConvergenceIssue]) {
    for issue in issues {
        match issue.severity {
            Severity::Warning => warn!("{issue}"),
            Severity::Info => info!("{issue}"),
        }
    }
}
