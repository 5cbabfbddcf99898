//! The model container: data, priors, scaling and, once fit, the posterior.

use log::warn;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::density::{GlmLogp, ParameterLayout};
use crate::diagnostics;
use crate::draws::Draws;
use crate::error::{GlmError, Result};
use crate::family::{Family, Link};
use crate::formula::{model_frame, Dataset, Formula};
use crate::prior::Prior;
use crate::sampler::{McmcEngine, NutsEngine, SamplerSettings};
use crate::standardize::{standardize_columns, standardize_vector, Scaling};

/// Options for building a model.
#[derive(Debug, Clone)]
pub struct ModelOptions {
    /// Priors on the standardized scale. Family defaults when `None`.
    pub prior: Option<Prior>,
    /// Standardize the predictors, and the outcome of Normal and StudentT models.
    pub standardize: bool,
    /// Predictor names for [`BayesGlm::from_matrices`]. `X1..Xn` when empty.
    pub names: Vec<String>,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            prior: None,
            standardize: true,
            names: Vec::new(),
        }
    }
}

/// Both sample stores of a fitted model.
///
/// `samples` holds the draws in the parameterization the sampler saw,
/// `unstandardized` the same draws mapped back to the scale of the data.
/// Labels are the parameter names followed by the sampler internals.
#[derive(Debug, Clone)]
pub struct Posterior {
    pub(crate) samples: Draws,
    pub(crate) unstandardized: Draws,
    pub(crate) parameters: Vec<String>,
    pub(crate) internals: Vec<String>,
}

impl Posterior {
    pub fn samples(&self) -> &Draws {
        &self.samples
    }

    pub fn unstandardized(&self) -> &Draws {
        &self.unstandardized
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn internals(&self) -> &[String] {
        &self.internals
    }

    pub(crate) fn store(&self, standardized: bool) -> &Draws {
        if standardized {
            &self.samples
        } else {
            &self.unstandardized
        }
    }
}

/// A Bayesian generalized linear model.
///
/// Building a model validates and scales the data; [`BayesGlm::fit`] is
/// the only operation that changes it afterwards.
#[derive(Debug, Clone)]
pub struct BayesGlm {
    formula: Formula,
    family: Family,
    prior: Prior,
    y: Array1<f64>,
    y_std: Array1<f64>,
    x_std: Array2<f64>,
    scaling: Scaling,
    layout: ParameterLayout,
    standardized: bool,
    posterior: Option<Posterior>,
}

impl BayesGlm {
    /// Build a model from a formula such as `"mpg ~ wt + hp"`.
    ///
    /// Grouping terms like `(1 | g)` are rejected with [`GlmError::RandomEffects`].
    pub fn new(formula: &str, data: &Dataset, family: Family, options: ModelOptions) -> Result<Self> {
        let formula = Formula::parse(formula)?;
        if formula.has_random_effects() {
            return Err(GlmError::RandomEffects(formula.random_effects.join(", ")));
        }
        let frame = model_frame(&formula, data)?;
        Self::build(formula, frame.y, frame.x, family, options)
    }

    /// Build a model from an outcome vector and a design matrix without
    /// intercept column.
    pub fn from_matrices(
        y: ArrayView1<f64>,
        x: ArrayView2<f64>,
        family: Family,
        options: ModelOptions,
    ) -> Result<Self> {
        let names = if options.names.is_empty() {
            (1..=x.ncols()).map(|j| format!("X{j}")).collect()
        } else if options.names.len() == x.ncols() {
            options.names.clone()
        } else {
            return Err(GlmError::DimensionMismatch {
                context: "predictor names",
                expected: x.ncols(),
                actual: options.names.len(),
            });
        };
        let formula = Formula::from_names("y", &names);
        Self::build(formula, y.to_owned(), x.to_owned(), family, options)
    }

    fn build(
        formula: Formula,
        y: Array1<f64>,
        x: Array2<f64>,
        family: Family,
        options: ModelOptions,
    ) -> Result<Self> {
        if y.is_empty() {
            return Err(GlmError::InvalidArgument("the data has no observations".to_string()));
        }
        if x.nrows() != y.len() {
            return Err(GlmError::DimensionMismatch {
                context: "design matrix rows",
                expected: y.len(),
                actual: x.nrows(),
            });
        }
        family.validate_outcome(y.view())?;
        if x.iter().any(|v| !v.is_finite()) {
            return Err(GlmError::InvalidArgument(
                "the design matrix has non-finite values".to_string(),
            ));
        }

        let predictor_names = formula.predictor_names();
        let layout = ParameterLayout::new(&predictor_names, family)?;
        let prior = options.prior.unwrap_or_else(|| Prior::default_for(family));
        prior.validate(family)?;

        let (scaling, y_std, x_std) = if options.standardize {
            let (mu_x, sigma_x, x_std) = standardize_columns(x.view(), &predictor_names)?;
            let (mu_y, sigma_y, y_std) = if family.standardizes_outcome() {
                standardize_vector(y.view(), &formula.response)?
            } else {
                (0., 1., y.clone())
            };
            let scaling = Scaling {
                mu_x,
                sigma_x,
                mu_y,
                sigma_y,
            };
            (scaling, y_std, x_std)
        } else {
            warn!("standardization is disabled; sampling unscaled data is usually slower and less stable");
            (Scaling::identity(x.ncols()), y.clone(), x)
        };

        Ok(Self {
            formula,
            family,
            prior,
            y,
            y_std,
            x_std,
            scaling,
            layout,
            standardized: options.standardize,
            posterior: None,
        })
    }

    /// Sample the posterior with the default NUTS engine.
    pub fn fit(&mut self, settings: &SamplerSettings) -> Result<&mut Self> {
        self.fit_with(&NutsEngine, settings)
    }

    /// Sample the posterior with `engine`, replacing any earlier posterior.
    ///
    /// Convergence diagnostics are logged unless `settings.quiet` is set.
    pub fn fit_with<E: McmcEngine>(&mut self, engine: &E, settings: &SamplerSettings) -> Result<&mut Self> {
        let logp = GlmLogp::new(
            self.y_std.view(),
            self.x_std.view(),
            self.family,
            &self.prior,
            &self.layout,
        )?;
        let trace = engine.sample(&logp, settings).map_err(GlmError::Engine)?;
        let unstandardized = self.scaling.unstandardize(&trace.draws, &self.layout)?;
        let posterior = Posterior {
            samples: trace.draws,
            unstandardized,
            parameters: self.layout.display_names().to_vec(),
            internals: trace.internals,
        };

        if !settings.quiet {
            let summary = engine.summarize(&posterior.unstandardized, &posterior.parameters)?;
            let issues = diagnostics::check_convergence(&summary, &Default::default());
            diagnostics::log_issues(&issues);
        }
        self.posterior = Some(posterior);
        Ok(self)
    }

    pub fn formula(&self) -> &Formula {
        &self.formula
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn link(&self) -> Link {
        self.family.link()
    }

    pub fn prior(&self) -> &Prior {
        &self.prior
    }

    /// The outcome on its original scale.
    pub fn outcome(&self) -> ArrayView1<'_, f64> {
        self.y.view()
    }

    /// The outcome as the sampler sees it.
    pub fn outcome_std(&self) -> ArrayView1<'_, f64> {
        self.y_std.view()
    }

    /// The design matrix as the sampler sees it, without intercept column.
    pub fn design_matrix(&self) -> ArrayView2<'_, f64> {
        self.x_std.view()
    }

    pub fn scaling(&self) -> &Scaling {
        &self.scaling
    }

    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    pub fn predictor_names(&self) -> &[String] {
        &self.layout.display_names()[self.layout.coefficients()]
    }

    /// Whether standardization was requested. The outcome is only scaled
    /// for families where [`Family::standardizes_outcome`] holds.
    pub fn is_standardized(&self) -> bool {
        self.standardized
    }

    pub fn num_observations(&self) -> usize {
        self.y.len()
    }

    pub fn is_fitted(&self) -> bool {
        self.posterior.is_some()
    }

    pub fn posterior(&self) -> Result<&Posterior> {
        self.posterior.as_ref().ok_or(GlmError::NotFitted)
    }
}

#[cfg(test)]
pub(crate) mod test_engine {
    use anyhow::{bail, Result};
    use ndarray::{array, Array3};

    use crate::draws::Draws;
    use crate::formula::Dataset;
    use crate::hamiltonian::CpuLogpFunc;
    use crate::sampler::{McmcEngine, SamplerSettings, Trace, INTERNAL_NAMES};

    /// Returns draws computed from `(draw, parameter slot, chain)`.
    ///
    /// Internals are `lp = -slot sum` and zeros otherwise.
    pub(crate) struct StubEngine {
        pub(crate) value: fn(usize, usize, usize) -> f64,
    }

    impl McmcEngine for StubEngine {
        fn sample<F: CpuLogpFunc>(&self, logp: &F, settings: &SamplerSettings) -> Result<Trace> {
            let parameters = logp.expanded_names();
            let internals: Vec<String> = INTERNAL_NAMES.iter().map(|s| s.to_string()).collect();
            let dim = parameters.len();
            let values = Array3::from_shape_fn(
                (
                    settings.num_draws as usize,
                    dim + internals.len(),
                    settings.num_chains,
                ),
                |(d, i, c)| {
                    if i < dim {
                        (self.value)(d, i, c)
                    } else if i == dim {
                        -((0..dim).map(|j| (self.value)(d, j, c)).sum::<f64>())
                    } else {
                        0.
                    }
                },
            );
            let labels = parameters.iter().chain(&internals).cloned().collect();
            Ok(Trace {
                draws: Draws::new(values, labels)?,
                parameters,
                internals,
            })
        }
    }

    pub(crate) struct FailingEngine;

    impl McmcEngine for FailingEngine {
        fn sample<F: CpuLogpFunc>(&self, _logp: &F, _settings: &SamplerSettings) -> Result<Trace> {
            bail!("every initial point failed")
        }
    }

    /// A slice of the motor trend cars data.
    pub(crate) fn cars() -> Dataset {
        Dataset::new()
            .with_column("mpg", array![21., 21., 22.8, 21.4, 18.7, 18.1, 14.3, 24.4, 22.8, 19.2])
            .unwrap()
            .with_column("wt", array![2.62, 2.875, 2.32, 3.215, 3.44, 3.46, 3.57, 3.19, 3.15, 3.44])
            .unwrap()
            .with_column("hp", array![110., 110., 93., 110., 175., 105., 245., 62., 95., 123.])
            .unwrap()
    }

    pub(crate) fn settings(num_draws: u64, num_chains: usize) -> SamplerSettings {
        SamplerSettings {
            num_draws,
            num_chains,
            quiet: true,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_engine::{cars, settings, FailingEngine, StubEngine};
    use super::*;
    use ndarray::{array, Axis};
    use pretty_assertions::assert_eq;

    #[test]
    fn build_from_formula() {
        let model = BayesGlm::new("mpg ~ wt + hp", &cars(), Family::Normal, Default::default()).unwrap();
        assert_eq!(model.predictor_names(), &["wt".to_string(), "hp".to_string()][..]);
        assert_eq!(model.link(), Link::Identity);
        assert_eq!(model.num_observations(), 10);
        assert!(model.is_standardized());
        assert!(!model.is_fitted());
        assert!(matches!(model.posterior(), Err(GlmError::NotFitted)));
        assert!(model.outcome_std().sum().abs() < 1e-10);
        assert!(model.design_matrix().column(1).sum().abs() < 1e-10);
        assert!((model.scaling().mu_y - 20.37).abs() < 1e-10);
    }

    #[test]
    fn counts_are_not_scaled() {
        let data = Dataset::new()
            .with_column("n", array![0., 3., 1., 4.])
            .unwrap()
            .with_column("x", array![1., 2., 3., 5.])
            .unwrap();
        let model = BayesGlm::new("n ~ x", &data, Family::Poisson, Default::default()).unwrap();
        assert_eq!(model.outcome_std(), model.outcome());
        assert_eq!(model.scaling().sigma_y, 1.);
        assert!(model.scaling().sigma_x[0] > 1.);
    }

    #[test]
    fn random_effects_are_rejected() {
        let err = BayesGlm::new("mpg ~ wt + (1 | hp)", &cars(), Family::Normal, Default::default())
            .unwrap_err();
        assert!(matches!(err, GlmError::RandomEffects(_)));
    }

    #[test]
    fn matrices_get_default_names() {
        let y = array![1., 0., 1., 1.];
        let x = array![[0.1, 2.], [0.5, 1.], [0.2, 4.], [0.9, 3.]];
        let model = BayesGlm::from_matrices(y.view(), x.view(), Family::Bernoulli, Default::default())
            .unwrap();
        assert_eq!(model.formula().to_string(), "y ~ X1 + X2");
        let named = ModelOptions {
            names: vec!["a".into()],
            ..Default::default()
        };
        assert!(BayesGlm::from_matrices(y.view(), x.view(), Family::Bernoulli, named).is_err());
    }

    #[test]
    fn invalid_data() {
        let x = array![[1.], [2.], [3.]];
        let bad_y = array![0., 2., 1.];
        assert!(matches!(
            BayesGlm::from_matrices(bad_y.view(), x.view(), Family::Bernoulli, Default::default()),
            Err(GlmError::InvalidOutcome { .. })
        ));
        let y = array![1., 2., 3.];
        let constant = array![[1.], [1.], [1.]];
        assert!(matches!(
            BayesGlm::from_matrices(y.view(), constant.view(), Family::Normal, Default::default()),
            Err(GlmError::ConstantColumn(_))
        ));
        let unscaled = ModelOptions {
            standardize: false,
            ..Default::default()
        };
        assert!(BayesGlm::from_matrices(y.view(), constant.view(), Family::Normal, unscaled).is_ok());
        let empty = ndarray::Array1::<f64>::zeros(0);
        let no_rows = ndarray::Array2::<f64>::zeros((0, 1));
        assert!(BayesGlm::from_matrices(empty.view(), no_rows.view(), Family::Normal, Default::default())
            .is_err());
    }

    #[test]
    fn fit_fills_both_stores() {
        let mut model =
            BayesGlm::new("mpg ~ wt + hp", &cars(), Family::Normal, Default::default()).unwrap();
        let engine = StubEngine {
            value: |d, i, c| 0.1 * i as f64 + 0.001 * d as f64 + 0.01 * c as f64 + 0.5,
        };
        let fitted = model.fit_with(&engine, &settings(30, 2)).unwrap();
        assert!(fitted.is_fitted());
        let posterior = model.posterior().unwrap();
        assert_eq!(posterior.parameters(), &["alpha", "wt", "hp", "sigma"]);
        assert_eq!(posterior.internals().len(), 9);
        assert_eq!(posterior.samples().values().dim(), (30, 13, 2));
        let sigma = posterior.samples().position("sigma").unwrap();
        let raw = posterior.unstandardized().values().index_axis(Axis(1), sigma).to_owned();
        let native = posterior.samples().values().index_axis(Axis(1), sigma).to_owned();
        let sigma_y = model.scaling().sigma_y;
        assert!(raw
            .iter()
            .zip(native.iter())
            .all(|(r, n)| (r - n * sigma_y).abs() < 1e-12));

        // refitting replaces the stores
        model.fit_with(&engine, &settings(10, 1)).unwrap();
        assert_eq!(model.posterior().unwrap().samples().num_draws(), 10);
    }

    #[test]
    fn engine_errors_propagate() {
        let mut model =
            BayesGlm::new("mpg ~ wt", &cars(), Family::Normal, Default::default()).unwrap();
        let err = model.fit_with(&FailingEngine, &settings(10, 1)).unwrap_err();
        assert!(matches!(err, GlmError::Engine(_)));
        assert!(err.to_string().contains("every initial point failed"));
        assert!(!model.is_fitted());
    }
}
