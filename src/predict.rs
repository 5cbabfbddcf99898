//! Linear predictor, expected value and posterior predictive draws.
//!
//! All three are computed from the standardized-model draws on the
//! standardized scale and rescaled to the outcome scale at the end.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, Array3, ArrayView2, Axis};
use rand::Rng;

use crate::draws::{Dim, DrawArray, Reducer, SelectOptions};
use crate::error::{GlmError, Result};
use crate::model::BayesGlm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionType {
    /// Simulated observations.
    Posterior,
    /// Expected value, the inverse link of the linear predictor.
    Epred,
    Linpred,
}

impl FromStr for PredictionType {
    type Err = GlmError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "posterior" => Ok(PredictionType::Posterior),
            "epred" => Ok(PredictionType::Epred),
            "linpred" => Ok(PredictionType::Linpred),
            other => Err(GlmError::InvalidArgument(format!(
                "unknown prediction type '{other}', expected posterior, epred or linpred"
            ))),
        }
    }
}

impl fmt::Display for PredictionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PredictionType::Posterior => "posterior",
            PredictionType::Epred => "epred",
            PredictionType::Linpred => "linpred",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PredictOptions {
    /// Keep Normal and StudentT predictions on the standardized scale.
    pub standardized_output: bool,
    /// Standardize the predictors first. Defaults to true for new data and
    /// false for the training design, which is already standardized.
    pub transform_input: Option<bool>,
    pub select: SelectOptions,
}

impl BayesGlm {
    fn prediction_design(&self, x_new: Option<ArrayView2<f64>>, opts: &PredictOptions) -> Result<Array2<f64>> {
        let transform = opts.transform_input.unwrap_or(x_new.is_some());
        let x = match &x_new {
            Some(x) => x.view(),
            None => self.design_matrix(),
        };
        if transform {
            self.scaling().transform_x(x)
        } else if x.ncols() != self.layout().num_coefficients() {
            Err(GlmError::DimensionMismatch {
                context: "predictor columns",
                expected: self.layout().num_coefficients(),
                actual: x.ncols(),
            })
        } else {
            Ok(x.to_owned())
        }
    }

    /// Linear predictor on the standardized scale, indexed (draw, observation, chain).
    pub(crate) fn linear_chains(&self, x_new: Option<ArrayView2<f64>>, opts: &PredictOptions) -> Result<Array3<f64>> {
        let x = self.prediction_design(x_new, opts)?;
        let posterior = self.posterior()?;
        let window = posterior.samples.window(&opts.select)?;
        let names = self.layout().display_names();
        let position = |slot: usize| {
            posterior
                .samples
                .position(&names[slot])
                .ok_or_else(|| GlmError::UnknownParameter(names[slot].clone()))
        };
        let alpha = position(0)?;
        let coefficients = self
            .layout()
            .coefficients()
            .map(position)
            .collect::<Result<Vec<_>>>()?;

        let (draws, _, chains) = window.dim();
        let mut eta = Array3::zeros((draws, x.nrows(), chains));
        for (chain, mut out) in eta.axis_iter_mut(Axis(2)).enumerate() {
            let params = window.index_axis(Axis(2), chain);
            let beta = params.select(Axis(1), &coefficients);
            out.assign(&beta.dot(&x.t()));
            for (mut row, &a) in out.outer_iter_mut().zip(params.column(alpha)) {
                row += a;
            }
        }
        Ok(eta)
    }

    fn to_output_scale(&self, values: &mut Array3<f64>, opts: &PredictOptions) {
        if !opts.standardized_output && self.family().standardizes_outcome() {
            let scaling = self.scaling();
            values.mapv_inplace(|v| scaling.inverse_y(v));
        }
    }

    /// Expected value on the output scale, indexed (draw, observation, chain).
    pub(crate) fn expected_chains(
        &self,
        x_new: Option<ArrayView2<f64>>,
        opts: &PredictOptions,
    ) -> Result<Array3<f64>> {
        let mut values = self.linear_chains(x_new, opts)?;
        let link = self.link();
        values.mapv_inplace(|eta| link.inverse(eta));
        self.to_output_scale(&mut values, opts);
        Ok(values)
    }

    fn predictive_chains<R: Rng + ?Sized>(
        &self,
        x_new: Option<ArrayView2<f64>>,
        opts: &PredictOptions,
        rng: &mut R,
    ) -> Result<Array3<f64>> {
        let mut values = self.linear_chains(x_new, opts)?;
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
        let link = self.link();
        let mut aux = vec![0f64; aux_positions.len()];
        for ((draw, _, chain), value) in values.indexed_iter_mut() {
            for (a, &pos) in aux.iter_mut().zip(&aux_positions) {
                *a = window[[draw, pos, chain]];
            }
            *value = family.sample(link.inverse(*value), &aux, rng)?;
        }
        self.to_output_scale(&mut values, opts);
        Ok(values)
    }

    fn finish_prediction(
        &self,
        values: Array3<f64>,
        reduce: Option<Reducer>,
        select: &SelectOptions,
    ) -> Result<DrawArray> {
        let labels = (0..values.len_of(Axis(1))).map(|i| i.to_string()).collect();
        DrawArray::from_chains(values, labels, Dim::Observation, select.collapse)?
            .finish(reduce, select.drop_singleton_dims)
    }

    /// `alpha + x beta` per draw, rescaled to the outcome scale for
    /// Normal and StudentT models unless `standardized_output` is set.
    ///
    /// `x_new` defaults to the training design.
    pub fn linear_predictor(
        &self,
        x_new: Option<ArrayView2<f64>>,
        reduce: Option<Reducer>,
        opts: &PredictOptions,
    ) -> Result<DrawArray> {
        let mut values = self.linear_chains(x_new, opts)?;
        self.to_output_scale(&mut values, opts);
        self.finish_prediction(values, reduce, &opts.select)
    }

    /// The inverse link applied to the linear predictor.
    pub fn expected_value(
        &self,
        x_new: Option<ArrayView2<f64>>,
        reduce: Option<Reducer>,
        opts: &PredictOptions,
    ) -> Result<DrawArray> {
        let values = self.expected_chains(x_new, opts)?;
        self.finish_prediction(values, reduce, &opts.select)
    }

    /// One simulated observation per row, draw and chain, using the thread rng.
    pub fn posterior_predictive(
        &self,
        x_new: Option<ArrayView2<f64>>,
        reduce: Option<Reducer>,
        opts: &PredictOptions,
    ) -> Result<DrawArray> {
        self.posterior_predictive_with_rng(x_new, reduce, opts, &mut rand::rng())
    }

    pub fn posterior_predictive_with_rng<R: Rng + ?Sized>(
        &self,
        x_new: Option<ArrayView2<f64>>,
        reduce: Option<Reducer>,
        opts: &PredictOptions,
        rng: &mut R,
    ) -> Result<DrawArray> {
        let values = self.predictive_chains(x_new, opts, rng)?;
        self.finish_prediction(values, reduce, &opts.select)
    }

    pub fn predict(
        &self,
        x_new: Option<ArrayView2<f64>>,
        kind: PredictionType,
        reduce: Option<Reducer>,
        opts: &PredictOptions,
    ) -> Result<DrawArray> {
        self.predict_with_rng(x_new, kind, reduce, opts, &mut rand::rng())
    }

    pub fn predict_with_rng<R: Rng + ?Sized>(
        &self,
        x_new: Option<ArrayView2<f64>>,
        kind: PredictionType,
        reduce: Option<Reducer>,
        opts: &PredictOptions,
        rng: &mut R,
    ) -> Result<DrawArray> {
        match kind {
            PredictionType::Linpred => self.linear_predictor(x_new, reduce, opts),
            PredictionType::Epred => self.expected_value(x_new, reduce, opts),
            PredictionType::Posterior => self.posterior_predictive_with_rng(x_new, reduce, opts, rng),
        }
    }
}
