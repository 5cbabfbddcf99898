use thiserror::Error;

use crate::family::Family;

/// Errors raised while building, fitting or querying a model.
#[derive(Error, Debug)]
pub enum GlmError {
    #[error("random-effect terms are not supported: {0}")]
    RandomEffects(String),

    #[error("formula parse error: {0}")]
    FormulaParse(String),

    #[error("missing column '{0}' in data")]
    MissingColumn(String),

    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid outcome for family {family}: {reason}")]
    InvalidOutcome { family: Family, reason: String },

    #[error("column '{0}' has zero variance and cannot be standardized")]
    ConstantColumn(String),

    #[error("duplicate or reserved name '{0}'")]
    DuplicateName(String),

    #[error("invalid prior: {0}")]
    InvalidPrior(String),

    #[error("model has not been fit yet")]
    NotFitted,

    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(
        "cannot select {requested} draws after dropping {drop_warmup} warmup draws from {total} draws per chain"
    )]
    InconsistentSelection {
        drop_warmup: usize,
        requested: usize,
        total: usize,
    },

    #[error("numerical error: {0}")]
    Numerical(String),

    #[error("sampler failed: {0:#}")]
    Engine(anyhow::Error),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, GlmError>;
