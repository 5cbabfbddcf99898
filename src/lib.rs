//! Bayesian generalized linear models sampled with NUTS.
//!
//! A [`BayesGlm`] standardizes its data, samples the posterior through an
//! [`McmcEngine`] (by default the bundled [`NutsEngine`]), and keeps the
//! draws on both the standardized and the raw scale. Accessors, predictions,
//! metrics and PSIS-LOO comparison all read from those draws through the
//! same [`SelectOptions`] pipeline.
//!
//! ```no_run
//! use nuts_glm::{BayesGlm, Dataset, Family, PredictOptions, PredictionType, Reducer, SamplerSettings};
//!
//! # fn main() -> nuts_glm::Result<()> {
//! let data = Dataset::new()
//!     .with_column("y", vec![1.2, 2.3, 2.9, 4.1, 5.2])?
//!     .with_column("x", vec![1., 2., 3., 4., 5.])?;
//! let mut model = BayesGlm::new("y ~ x", &data, Family::Normal, Default::default())?;
//! model.fit(&SamplerSettings { seed: Some(42), ..Default::default() })?;
//! let fitted = model.predict(None, PredictionType::Epred, Some(Reducer::Mean), &PredictOptions::default())?;
//! println!("{model}\n{:?}", fitted.values());
//! # Ok(())
//! # }
//! ```

pub(crate) mod adapt_strategy;
pub(crate) mod chain;
pub(crate) mod density;
pub(crate) mod describe;
pub(crate) mod diagnostics;
pub(crate) mod draws;
pub(crate) mod error;
pub(crate) mod family;
pub(crate) mod formula;
pub(crate) mod hamiltonian;
pub(crate) mod loo;
pub(crate) mod mass_matrix;
pub(crate) mod math;
pub(crate) mod metrics;
pub(crate) mod model;
pub(crate) mod nuts;
pub(crate) mod parameters;
pub(crate) mod predict;
pub(crate) mod prior;
pub(crate) mod sampler;
pub(crate) mod standardize;
pub(crate) mod state;
pub(crate) mod stepsize;

pub use density::{GlmLogp, GlmLogpError, ParameterLayout, INTERCEPT};
pub use diagnostics::{
    check_convergence, summarize, ConvergenceIssue, ConvergenceThresholds, Diagnostic,
    ParameterSummary, Severity,
};
pub use draws::{Dim, DrawArray, Draws, Reducer, SelectOptions};
pub use error::{GlmError, Result};
pub use family::{AuxKind, AuxParameter, Family, Link};
pub use formula::{model_frame, Dataset, Formula, ModelFrame, Term};
pub use hamiltonian::{CpuLogpFunc, LogpError};
pub use loo::{LogLikelihood, LooComparison, LooComparisonRow, LooEngine, LooResult, PsisLoo};
pub use mass_matrix::DiagAdaptExpSettings;
pub use metrics::{
    accuracy, auc, cohen_kappa, default_metrics, mae, r_squared, rmse, true_negative_rate,
    true_positive_rate, Metric, MetricInput, MetricsOptions,
};
pub use model::{BayesGlm, ModelOptions, Posterior};
pub use nuts::NutsError;
pub use parameters::AccessOptions;
pub use predict::{PredictOptions, PredictionType};
pub use prior::{Prior, PriorDistribution};
pub use sampler::{
    McmcEngine, NutsEngine, Parallelization, SamplerKind, SamplerSettings, Trace, INTERNAL_NAMES,
};
pub use standardize::{standardize_columns, standardize_vector, Scaling};
pub use stepsize::{DualAverageOptions, DualAverageSettings};
