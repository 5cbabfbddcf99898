//! The closed set of supported outcome families.
//!
//! Every family-dependent behavior lives in this table: link function,
//! auxiliary parameters and how they rescale, the observation
//! log-likelihood with its gradient, and the posterior predictive noise
//! model. Other modules only ever ask the family, they never match on it.

use std::fmt;

use ndarray::ArrayView1;
use rand::Rng;
use rand_distr::{Distribution, Gamma, Normal, Poisson, StudentT};
use statrs::function::gamma::{digamma, ln_gamma};

use crate::error::{GlmError, Result};
use crate::math::{log1p_exp, logistic};

/// Outcome distribution of a generalized linear model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Normal,
    StudentT,
    Bernoulli,
    Poisson,
    NegativeBinomial,
}

/// Link between the linear predictor and the mean of the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Link {
    Identity,
    Logit,
    Log,
}

/// How an auxiliary parameter behaves under outcome standardization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxKind {
    /// Measured in outcome units; multiplied by `sigma_y` when unstandardizing.
    Scale,
    /// Scale invariant (degrees of freedom, dispersion); copied unchanged.
    Shape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxParameter {
    pub name: &'static str,
    pub kind: AuxKind,
}

const NORMAL_AUX: [AuxParameter; 1] = [AuxParameter {
    name: "sigma",
    kind: AuxKind::Scale,
}];

const STUDENT_T_AUX: [AuxParameter; 2] = [
    AuxParameter {
        name: "sigma",
        kind: AuxKind::Scale,
    },
    AuxParameter {
        name: "nu",
        kind: AuxKind::Shape,
    },
];

const NEGATIVE_BINOMIAL_AUX: [AuxParameter; 1] = [AuxParameter {
    name: "phi_inv",
    kind: AuxKind::Shape,
}];

/// At most two auxiliary parameters exist across all families.
pub(crate) const MAX_AUX: usize = 2;

/// One observation's contribution to the log density.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LogLikTerm {
    pub(crate) value: f64,
    /// Derivative with respect to the linear predictor.
    pub(crate) d_eta: f64,
    /// Derivatives with respect to the auxiliary parameters on their natural scale.
    pub(crate) d_aux: [f64; MAX_AUX],
}

impl Family {
    pub const ALL: [Family; 5] = [
        Family::Normal,
        Family::StudentT,
        Family::Bernoulli,
        Family::Poisson,
        Family::NegativeBinomial,
    ];

    pub fn link(self) -> Link {
        match self {
            Family::Normal | Family::StudentT => Link::Identity,
            Family::Bernoulli => Link::Logit,
            Family::Poisson | Family::NegativeBinomial => Link::Log,
        }
    }

    /// Auxiliary parameters in the order they follow the coefficients.
    pub fn auxiliary(self) -> &'static [AuxParameter] {
        match self {
            Family::Normal => &NORMAL_AUX,
            Family::StudentT => &STUDENT_T_AUX,
            Family::Bernoulli | Family::Poisson => &[],
            Family::NegativeBinomial => &NEGATIVE_BINOMIAL_AUX,
        }
    }

    /// Only continuous unbounded outcomes are ever standardized.
    pub fn standardizes_outcome(self) -> bool {
        matches!(self, Family::Normal | Family::StudentT)
    }

    pub fn is_binary(self) -> bool {
        self == Family::Bernoulli
    }

    pub(crate) fn validate_outcome(self, y: ArrayView1<f64>) -> Result<()> {
        let invalid = |reason: String| GlmError::InvalidOutcome {
            family: self,
            reason,
        };
        if let Some(pos) = y.iter().position(|v| !v.is_finite()) {
            return Err(invalid(format!("non-finite value at row {}", pos + 1)));
        }
        match self {
            Family::Normal | Family::StudentT => Ok(()),
            Family::Bernoulli => match y.iter().position(|&v| v != 0. && v != 1.) {
                Some(pos) => Err(invalid(format!(
                    "value {} at row {} is not 0 or 1",
                    y[pos],
                    pos + 1
                ))),
                None => Ok(()),
            },
            Family::Poisson | Family::NegativeBinomial => {
                match y.iter().position(|&v| v < 0. || v.fract() != 0.) {
                    Some(pos) => Err(invalid(format!(
                        "value {} at row {} is not a non-negative count",
                        y[pos],
                        pos + 1
                    ))),
                    None => Ok(()),
                }
            }
        }
    }

    pub(crate) fn log_likelihood(self, y: f64, eta: f64, aux: &[f64]) -> f64 {
        self.log_likelihood_grad(y, eta, aux).value
    }

    pub(crate) fn log_likelihood_grad(self, y: f64, eta: f64, aux: &[f64]) -> LogLikTerm {
        let mut d_aux = [0f64; MAX_AUX];
        match self {
            Family::Normal => {
                let sigma = aux[0];
                let r = (y - eta) / sigma;
                d_aux[0] = (r * r - 1.) / sigma;
                LogLikTerm {
                    value: -sigma.ln() - 0.5 * (2. * std::f64::consts::PI).ln() - 0.5 * r * r,
                    d_eta: r / sigma,
                    d_aux,
                }
            }
            Family::StudentT => {
                let (sigma, nu) = (aux[0], aux[1]);
                let r = (y - eta) / sigma;
                let r2 = r * r;
                let q = 1. + r2 / nu;
                let value = ln_gamma((nu + 1.) / 2.)
                    - ln_gamma(nu / 2.)
                    - 0.5 * (nu * std::f64::consts::PI).ln()
                    - sigma.ln()
                    - (nu + 1.) / 2. * q.ln();
                d_aux[0] = (-1. + (nu + 1.) * r2 / (nu + r2)) / sigma;
                d_aux[1] = 0.5 * digamma((nu + 1.) / 2.) - 0.5 * digamma(nu / 2.) - 0.5 / nu
                    - 0.5 * q.ln()
                    + (nu + 1.) * r2 / (2. * nu * (nu + r2));
                LogLikTerm {
                    value,
                    d_eta: (nu + 1.) * r / (sigma * (nu + r2)),
                    d_aux,
                }
            }
            Family::Bernoulli => LogLikTerm {
                value: y * eta - log1p_exp(eta),
                d_eta: y - logistic(eta),
                d_aux,
            },
            Family::Poisson => {
                let mu = eta.exp();
                LogLikTerm {
                    value: y * eta - mu - ln_gamma(y + 1.),
                    d_eta: y - mu,
                    d_aux,
                }
            }
            Family::NegativeBinomial => {
                let phi = 1. / aux[0];
                let mu = eta.exp();
                let log_total = (phi + mu).ln();
                let value = ln_gamma(y + phi) - ln_gamma(phi) - ln_gamma(y + 1.)
                    + phi * phi.ln()
                    + y * eta
                    - (phi + y) * log_total;
                let d_phi = digamma(y + phi) - digamma(phi) + phi.ln() + 1.
                    - log_total
                    - (phi + y) / (phi + mu);
                d_aux[0] = -d_phi * phi * phi;
                LogLikTerm {
                    value,
                    d_eta: y - (phi + y) * mu / (phi + mu),
                    d_aux,
                }
            }
        }
    }

    /// Draw one observation with expected value `mean`.
    pub(crate) fn sample<R: Rng + ?Sized>(self, mean: f64, aux: &[f64], rng: &mut R) -> Result<f64> {
        let numerical = |err: &dyn fmt::Display| {
            GlmError::Numerical(format!("{self} noise model with mean {mean}: {err}"))
        };
        match self {
            Family::Normal => {
                let dist = Normal::new(mean, aux[0]).map_err(|e| numerical(&e))?;
                Ok(dist.sample(rng))
            }
            Family::StudentT => {
                let dist = StudentT::new(aux[1]).map_err(|e| numerical(&e))?;
                let standard: f64 = dist.sample(rng);
                Ok(mean + aux[0] * standard)
            }
            Family::Bernoulli => Ok(if rng.random::<f64>() < mean { 1. } else { 0. }),
            Family::Poisson => sample_poisson(mean, rng).map_err(|e| numerical(&e)),
            Family::NegativeBinomial => {
                if mean == 0. {
                    return Ok(0.);
                }
                let phi = 1. / aux[0];
                let gamma = Gamma::new(phi, mean / phi).map_err(|e| numerical(&e))?;
                let rate: f64 = gamma.sample(rng);
                sample_poisson(rate, rng).map_err(|e| numerical(&e))
            }
        }
    }
}

fn sample_poisson<R: Rng + ?Sized>(rate: f64, rng: &mut R) -> std::result::Result<f64, rand_distr::PoissonError> {
    if rate == 0. {
        return Ok(0.);
    }
    let dist = Poisson::new(rate)?;
    let draw: f64 = dist.sample(rng);
    Ok(draw)
}

impl Link {
    /// Maps the linear predictor to the expected value.
    pub fn inverse(self, eta: f64) -> f64 {
        match self {
            Link::Identity => eta,
            Link::Logit => logistic(eta),
            Link::Log => eta.exp(),
        }
    }

    /// Maps an expected value to the linear predictor.
    pub fn apply(self, mu: f64) -> f64 {
        match self {
            Link::Identity => mu,
            Link::Logit => (mu / (1. - mu)).ln(),
            Link::Log => mu.ln(),
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Family::Normal => "Normal",
            Family::StudentT => "StudentT",
            Family::Bernoulli => "Bernoulli",
            Family::Poisson => "Poisson",
            Family::NegativeBinomial => "NegativeBinomial",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Link::Identity => "identity",
            Link::Logit => "logit",
            Link::Log => "log",
        };
        f.write_str(name)
    }
}
