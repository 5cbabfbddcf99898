use std::fmt;

use statrs::function::gamma::ln_gamma;

use crate::error::{GlmError, Result};
use crate::family::Family;

const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

/// A univariate prior on one model parameter.
///
/// Coefficient priors are placed on the standardized scale when the model
/// standardizes its inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriorDistribution {
    Normal { mean: f64, std: f64 },
    StudentT { df: f64, location: f64, scale: f64 },
    Exponential { rate: f64 },
    LogNormal { mu: f64, sigma: f64 },
    Gamma { shape: f64, rate: f64 },
}

impl PriorDistribution {
    pub fn ln_pdf(&self, x: f64) -> f64 {
        match *self {
            PriorDistribution::Normal { mean, std } => {
                let z = (x - mean) / std;
                -0.5 * z * z - std.ln() - LN_SQRT_2PI
            }
            PriorDistribution::StudentT {
                df,
                location,
                scale,
            } => {
                let t = (x - location) / scale;
                ln_gamma((df + 1.) / 2.)
                    - ln_gamma(df / 2.)
                    - 0.5 * (df * std::f64::consts::PI).ln()
                    - scale.ln()
                    - (df + 1.) / 2. * (t * t / df).ln_1p()
            }
            PriorDistribution::Exponential { rate } => {
                if x < 0. {
                    return f64::NEG_INFINITY;
                }
                rate.ln() - rate * x
            }
            PriorDistribution::LogNormal { mu, sigma } => {
                if x <= 0. {
                    return f64::NEG_INFINITY;
                }
                let z = (x.ln() - mu) / sigma;
                -x.ln() - sigma.ln() - LN_SQRT_2PI - 0.5 * z * z
            }
            PriorDistribution::Gamma { shape, rate } => {
                if x <= 0. {
                    return f64::NEG_INFINITY;
                }
                shape * rate.ln() - ln_gamma(shape) + (shape - 1.) * x.ln() - rate * x
            }
        }
    }

    /// Derivative of [`Self::ln_pdf`] with respect to `x`.
    pub fn d_ln_pdf(&self, x: f64) -> f64 {
        match *self {
            PriorDistribution::Normal { mean, std } => -(x - mean) / (std * std),
            PriorDistribution::StudentT {
                df,
                location,
                scale,
            } => {
                let t = (x - location) / scale;
                -(df + 1.) * t / (scale * (df + t * t))
            }
            PriorDistribution::Exponential { rate } => -rate,
            PriorDistribution::LogNormal { mu, sigma } => {
                -1. / x - (x.ln() - mu) / (sigma * sigma * x)
            }
            PriorDistribution::Gamma { shape, rate } => (shape - 1.) / x - rate,
        }
    }

    /// True if the distribution only has mass on the positive reals.
    pub fn is_positive(&self) -> bool {
        !matches!(
            self,
            PriorDistribution::Normal { .. } | PriorDistribution::StudentT { .. }
        )
    }

    fn validate(&self) -> Result<()> {
        let params: &[(&str, f64)] = match self {
            PriorDistribution::Normal { mean, std } => &[("mean", *mean), ("std", *std)],
            PriorDistribution::StudentT {
                df,
                location,
                scale,
            } => &[("df", *df), ("location", *location), ("scale", *scale)],
            PriorDistribution::Exponential { rate } => &[("rate", *rate)],
            PriorDistribution::LogNormal { mu, sigma } => &[("mu", *mu), ("sigma", *sigma)],
            PriorDistribution::Gamma { shape, rate } => &[("shape", *shape), ("rate", *rate)],
        };
        for &(name, value) in params {
            if !value.is_finite() {
                return Err(GlmError::InvalidPrior(format!(
                    "{self}: {name} must be finite"
                )));
            }
            let location_like = matches!(name, "mean" | "location" | "mu");
            if !location_like && value <= 0. {
                return Err(GlmError::InvalidPrior(format!(
                    "{self}: {name} must be positive"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for PriorDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriorDistribution::Normal { mean, std } => write!(f, "Normal({mean}, {std})"),
            PriorDistribution::StudentT {
                df,
                location,
                scale,
            } => write!(f, "StudentT({df}, {location}, {scale})"),
            PriorDistribution::Exponential { rate } => write!(f, "Exponential({rate})"),
            PriorDistribution::LogNormal { mu, sigma } => write!(f, "LogNormal({mu}, {sigma})"),
            PriorDistribution::Gamma { shape, rate } => write!(f, "Gamma({shape}, {rate})"),
        }
    }
}

/// Priors for all parameters of a model.
///
/// `predictors` is shared by every coefficient. `auxiliary` lists one
/// named prior per auxiliary parameter of the family, in family order.
#[derive(Debug, Clone, PartialEq)]
pub struct Prior {
    pub predictors: PriorDistribution,
    pub intercept: PriorDistribution,
    pub auxiliary: Vec<(String, PriorDistribution)>,
}

impl Prior {
    pub fn default_for(family: Family) -> Self {
        let weak = PriorDistribution::StudentT {
            df: 3.,
            location: 0.,
            scale: 2.5,
        };
        let auxiliary = family
            .auxiliary()
            .iter()
            .map(|aux| {
                let dist = match aux.name {
                    "nu" => PriorDistribution::LogNormal { mu: 2., sigma: 1. },
                    _ => PriorDistribution::Exponential { rate: 1. },
                };
                (aux.name.to_string(), dist)
            })
            .collect();
        Prior {
            predictors: weak,
            intercept: weak,
            auxiliary,
        }
    }

    pub(crate) fn validate(&self, family: Family) -> Result<()> {
        self.predictors.validate()?;
        self.intercept.validate()?;
        let expected = family.auxiliary();
        if expected.len() != self.auxiliary.len() {
            return Err(GlmError::InvalidPrior(format!(
                "family {family} has {} auxiliary parameters but {} priors were given",
                expected.len(),
                self.auxiliary.len()
            )));
        }
        for (aux, (name, dist)) in expected.iter().zip(&self.auxiliary) {
            if aux.name != name {
                return Err(GlmError::InvalidPrior(format!(
                    "expected a prior for '{}', found '{name}'",
                    aux.name
                )));
            }
            dist.validate()?;
            if !dist.is_positive() {
                return Err(GlmError::InvalidPrior(format!(
                    "'{name}' is positive but has prior {dist}"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Prior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  predictors: {}", self.predictors)?;
        write!(f, "  intercept: {}", self.intercept)?;
        for (name, dist) in &self.auxiliary {
            write!(f, "\n  {name}: {dist}")?;
        }
        Ok(())
    }
}
