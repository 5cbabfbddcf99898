//! Named slices of the posterior.
//!
//! Every accessor selects labels from one of the two sample stores, runs
//! them through [`Draws::select`](crate::draws::Draws::select), then
//! optionally reduces along the draw axis and drops singleton axes.

use crate::draws::{DrawArray, Reducer, SelectOptions};
use crate::error::{GlmError, Result};
use crate::model::BayesGlm;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessOptions {
    /// Read the draws of the standardized model instead of the raw-scale ones.
    pub standardized: bool,
    pub select: SelectOptions,
}

impl BayesGlm {
    /// Draws of the named parameters or sampler internals.
    ///
    /// Coefficients can be named by predictor (`wt`) or canonically
    /// (`beta[1]`); results are labeled by predictor.
    pub fn get_parameters<S: AsRef<str>>(
        &self,
        names: &[S],
        reduce: Option<Reducer>,
        opts: &AccessOptions,
    ) -> Result<DrawArray> {
        let posterior = self.posterior()?;
        let labels = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                match self.layout().label(name) {
                    Some(label) => Ok(label),
                    None if posterior.internals.iter().any(|i| i == name) => Ok(name),
                    None => Err(GlmError::UnknownParameter(name.to_string())),
                }
            })
            .collect::<Result<Vec<_>>>()?;
        posterior
            .store(opts.standardized)
            .subset(&labels)?
            .select(&opts.select)?
            .finish(reduce, opts.select.drop_singleton_dims)
    }

    /// Intercept, coefficients and auxiliary parameters.
    pub fn parameters(&self, reduce: Option<Reducer>, opts: &AccessOptions) -> Result<DrawArray> {
        self.get_parameters(self.layout().display_names(), reduce, opts)
    }

    /// Intercept and coefficients.
    pub fn fixed_effects(&self, reduce: Option<Reducer>, opts: &AccessOptions) -> Result<DrawArray> {
        let names = &self.layout().display_names()[..=self.layout().num_coefficients()];
        self.get_parameters(names, reduce, opts)
    }

    /// Sampler statistics, always from the native store.
    pub fn internals(&self, reduce: Option<Reducer>, select: &SelectOptions) -> Result<DrawArray> {
        let opts = AccessOptions {
            standardized: true,
            select: *select,
        };
        self.get_parameters(self.posterior()?.internals.as_slice(), reduce, &opts)
    }

    /// Fixed effects reduced over draws, by default with the median.
    pub fn point_estimate(&self, reduce: Option<Reducer>, opts: &AccessOptions) -> Result<DrawArray> {
        self.fixed_effects(Some(reduce.unwrap_or(Reducer::Median)), opts)
    }
}
