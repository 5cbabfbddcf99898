//! Scoring posterior predictions against the observed outcome.

use std::fmt;

use ndarray::{s, Array3, ArrayView1};

use crate::draws::{mean, Dim, DrawArray, Reducer};
use crate::error::{GlmError, Result};
use crate::family::Family;
use crate::math::average_ranks;
use crate::model::BayesGlm;
use crate::predict::PredictOptions;

/// What a metric expects as its first argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricInput {
    /// Expected values as predicted.
    Values,
    /// 0/1 classes; Bernoulli probabilities are thresholded first.
    Classes,
    /// Predicted probabilities.
    Probabilities,
}

/// A named score of `(predictions, outcomes)`.
#[derive(Clone)]
pub struct Metric {
    pub name: String,
    pub func: fn(ArrayView1<'_, f64>, ArrayView1<'_, f64>) -> f64,
    pub input: MetricInput,
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metric")
            .field("name", &self.name)
            .field("input", &self.input)
            .finish()
    }
}

impl Metric {
    pub fn new(
        name: impl Into<String>,
        func: fn(ArrayView1<'_, f64>, ArrayView1<'_, f64>) -> f64,
        input: MetricInput,
    ) -> Self {
        Self {
            name: name.into(),
            func,
            input,
        }
    }

    pub fn r_squared() -> Self {
        Self::new("r_squared", r_squared, MetricInput::Values)
    }

    pub fn rmse() -> Self {
        Self::new("rmse", rmse, MetricInput::Values)
    }

    pub fn mae() -> Self {
        Self::new("mae", mae, MetricInput::Values)
    }

    pub fn accuracy() -> Self {
        Self::new("accuracy", accuracy, MetricInput::Classes)
    }

    pub fn cohen_kappa() -> Self {
        Self::new("cohen_kappa", cohen_kappa, MetricInput::Classes)
    }

    pub fn true_positive_rate() -> Self {
        Self::new("true_positive_rate", true_positive_rate, MetricInput::Classes)
    }

    pub fn true_negative_rate() -> Self {
        Self::new("true_negative_rate", true_negative_rate, MetricInput::Classes)
    }

    pub fn auc() -> Self {
        Self::new("auc", auc, MetricInput::Probabilities)
    }
}

/// Classification metrics for Bernoulli models, regression metrics otherwise.
pub fn default_metrics(family: Family) -> Vec<Metric> {
    if family.is_binary() {
        vec![
            Metric::accuracy(),
            Metric::cohen_kappa(),
            Metric::true_positive_rate(),
            Metric::true_negative_rate(),
            Metric::auc(),
        ]
    } else {
        vec![Metric::r_squared(), Metric::rmse(), Metric::mae()]
    }
}

/// `1 - SS_res / SS_tot`
pub fn r_squared(predicted: ArrayView1<f64>, observed: ArrayView1<f64>) -> f64 {
    let center = mean(observed);
    let total: f64 = observed.iter().map(|y| (y - center).powi(2)).sum();
    let residual: f64 = predicted
        .iter()
        .zip(observed)
        .map(|(p, y)| (y - p).powi(2))
        .sum();
    1. - residual / total
}

pub fn rmse(predicted: ArrayView1<f64>, observed: ArrayView1<f64>) -> f64 {
    let sq = &predicted - &observed;
    mean(sq.mapv(|e| e * e).view()).sqrt()
}

pub fn mae(predicted: ArrayView1<f64>, observed: ArrayView1<f64>) -> f64 {
    let diff = &predicted - &observed;
    mean(diff.mapv(f64::abs).view())
}

/// Counts of (true positive, false positive, true negative, false negative).
fn confusion(predicted: ArrayView1<f64>, observed: ArrayView1<f64>) -> [f64; 4] {
    let mut counts = [0f64; 4];
    for (&p, &y) in predicted.iter().zip(observed) {
        let idx = match (p == 1., y == 1.) {
            (true, true) => 0,
            (true, false) => 1,
            (false, false) => 2,
            (false, true) => 3,
        };
        counts[idx] += 1.;
    }
    counts
}

pub fn accuracy(predicted: ArrayView1<f64>, observed: ArrayView1<f64>) -> f64 {
    let [tp, fp, tn, fn_] = confusion(predicted, observed);
    (tp + tn) / (tp + fp + tn + fn_)
}

/// Agreement beyond chance between predicted and observed classes.
pub fn cohen_kappa(predicted: ArrayView1<f64>, observed: ArrayView1<f64>) -> f64 {
    let [tp, fp, tn, fn_] = confusion(predicted, observed);
    let n = tp + fp + tn + fn_;
    let observed_agreement = (tp + tn) / n;
    let chance = ((tp + fp) * (tp + fn_) + (tn + fn_) * (tn + fp)) / (n * n);
    (observed_agreement - chance) / (1. - chance)
}

pub fn true_positive_rate(predicted: ArrayView1<f64>, observed: ArrayView1<f64>) -> f64 {
    let [tp, _, _, fn_] = confusion(predicted, observed);
    tp / (tp + fn_)
}

pub fn true_negative_rate(predicted: ArrayView1<f64>, observed: ArrayView1<f64>) -> f64 {
    let [_, fp, tn, _] = confusion(predicted, observed);
    tn / (tn + fp)
}

/// Area under the ROC curve via the Mann-Whitney statistic, ties count half.
pub fn auc(predicted: ArrayView1<f64>, observed: ArrayView1<f64>) -> f64 {
    let scores = predicted.to_vec();
    let ranks = average_ranks(&scores);
    let positives = observed.iter().filter(|&&y| y == 1.).count() as f64;
    let negatives = observed.len() as f64 - positives;
    let rank_sum: f64 = ranks
        .iter()
        .zip(observed)
        .filter(|(_, &y)| y == 1.)
        .map(|(r, _)| r)
        .sum();
    (rank_sum - positives * (positives + 1.) / 2.) / (positives * negatives)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsOptions {
    /// Bernoulli probabilities at or above this are class 1.
    pub threshold: f64,
    pub predict: PredictOptions,
}

impl Default for MetricsOptions {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            predict: PredictOptions::default(),
        }
    }
}

impl BayesGlm {
    /// Every metric evaluated per posterior draw of the expected value on
    /// the training data, indexed (draw, metric[, chain]).
    ///
    /// The outcome is compared on the scale of the predictions.
    pub fn calculate_metrics(
        &self,
        metrics: &[Metric],
        reduce: Option<Reducer>,
        opts: &MetricsOptions,
    ) -> Result<DrawArray> {
        if !(opts.threshold > 0. && opts.threshold < 1.) {
            return Err(GlmError::InvalidArgument(format!(
                "threshold {} is outside (0, 1)",
                opts.threshold
            )));
        }
        let expected = self.expected_chains(None, &opts.predict)?;
        let observed = if opts.predict.standardized_output {
            self.outcome_std()
        } else {
            self.outcome()
        };
        let binary = self.family().is_binary();
        let threshold = opts.threshold;

        let (draws, _, chains) = expected.dim();
        let mut values = Array3::zeros((draws, metrics.len(), chains));
        for draw in 0..draws {
            for chain in 0..chains {
                let prediction = expected.slice(s![draw, .., chain]);
                let classes =
                    binary.then(|| prediction.mapv(|p| if p >= threshold { 1. } else { 0. }));
                for (m, metric) in metrics.iter().enumerate() {
                    let input = match (&classes, metric.input) {
                        (Some(classes), MetricInput::Classes) => classes.view(),
                        _ => prediction,
                    };
                    values[[draw, m, chain]] = (metric.func)(input, observed);
                }
            }
        }

        let labels = metrics.iter().map(|m| m.name.clone()).collect();
        DrawArray::from_chains(values, labels, Dim::Metric, opts.predict.select.collapse)?
            .finish(reduce, opts.predict.select.drop_singleton_dims)
    }
}
