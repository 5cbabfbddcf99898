//! Parameter naming and the GLM log posterior handed to the sampler.

use std::collections::HashMap;
use std::ops::Range;

use ndarray::{ArrayView1, ArrayView2};
use rand::Rng;
use thiserror::Error;

use crate::error::{GlmError, Result};
use crate::family::{AuxKind, AuxParameter, Family, MAX_AUX};
use crate::hamiltonian::{CpuLogpFunc, LogpError};
use crate::prior::Prior;
use crate::sampler::INTERNAL_NAMES;

/// Name of the intercept.
pub const INTERCEPT: &str = "alpha";

/// Maps parameter slots to their canonical and display names.
///
/// Slot order is the intercept, one coefficient per predictor, then the
/// auxiliary parameters of the family. Coefficient `j` (1-based) has the
/// canonical name `beta[j]` and is displayed under the predictor name;
/// lookups accept either form.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterLayout {
    canonical: Vec<String>,
    display: Vec<String>,
    lookup: HashMap<String, usize>,
    num_coefficients: usize,
    auxiliary: &'static [AuxParameter],
}

fn is_coefficient_name(name: &str) -> bool {
    name == "beta" || (name.starts_with("beta[") && name.ends_with(']'))
}

impl ParameterLayout {
    /// Fails if a predictor name repeats or shadows a parameter or sampler name.
    pub fn new(predictor_names: &[String], family: Family) -> Result<Self> {
        let auxiliary = family.auxiliary();
        let reserved = |name: &str| {
            name == INTERCEPT
                || is_coefficient_name(name)
                || Family::ALL
                    .iter()
                    .flat_map(|f| f.auxiliary())
                    .any(|aux| aux.name == name)
                || INTERNAL_NAMES.contains(&name)
        };

        let mut canonical = vec![INTERCEPT.to_string()];
        let mut display = vec![INTERCEPT.to_string()];
        for (j, name) in predictor_names.iter().enumerate() {
            if reserved(name) {
                return Err(GlmError::DuplicateName(name.clone()));
            }
            canonical.push(format!("beta[{}]", j + 1));
            display.push(name.clone());
        }
        for aux in auxiliary {
            canonical.push(aux.name.to_string());
            display.push(aux.name.to_string());
        }

        let mut lookup = HashMap::new();
        for (slot, name) in display.iter().enumerate() {
            if lookup.insert(name.clone(), slot).is_some() {
                return Err(GlmError::DuplicateName(name.clone()));
            }
        }
        for (slot, name) in canonical.iter().enumerate() {
            lookup.insert(name.clone(), slot);
        }

        Ok(Self {
            canonical,
            display,
            lookup,
            num_coefficients: predictor_names.len(),
            auxiliary,
        })
    }

    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }

    pub fn canonical_names(&self) -> &[String] {
        &self.canonical
    }

    /// The labels used in sample stores.
    pub fn display_names(&self) -> &[String] {
        &self.display
    }

    /// Slot of a canonical or display name.
    pub fn resolve(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }

    /// The display label of a canonical or display name.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.resolve(name).map(|slot| self.display[slot].as_str())
    }

    pub fn num_coefficients(&self) -> usize {
        self.num_coefficients
    }

    pub fn coefficients(&self) -> Range<usize> {
        1..1 + self.num_coefficients
    }

    pub fn auxiliary(&self) -> Range<usize> {
        1 + self.num_coefficients..self.len()
    }

    pub fn auxiliary_parameters(&self) -> &'static [AuxParameter] {
        self.auxiliary
    }

    /// Slots of the scale-type auxiliary parameters.
    pub(crate) fn scale_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.auxiliary()
            .zip(self.auxiliary)
            .filter(|(_, aux)| aux.kind == AuxKind::Scale)
            .map(|(slot, _)| slot)
    }
}

#[derive(Debug, Error)]
pub enum GlmLogpError {
    #[error("log density is not finite at the current position")]
    NonFinite,
}

impl LogpError for GlmLogpError {
    fn is_recoverable(&self) -> bool {
        true
    }
}

/// Log posterior of a GLM in unconstrained coordinates.
///
/// The position is `[alpha, beta.., log(aux)..]`. Auxiliary parameters are
/// sampled on the log scale, the Jacobian of that transform is included.
#[derive(Debug, Clone)]
pub struct GlmLogp<'a> {
    y: ArrayView1<'a, f64>,
    x: ArrayView2<'a, f64>,
    family: Family,
    prior: &'a Prior,
    layout: &'a ParameterLayout,
}

impl<'a> GlmLogp<'a> {
    pub fn new(
        y: ArrayView1<'a, f64>,
        x: ArrayView2<'a, f64>,
        family: Family,
        prior: &'a Prior,
        layout: &'a ParameterLayout,
    ) -> Result<Self> {
        if x.nrows() != y.len() {
            return Err(GlmError::DimensionMismatch {
                context: "design matrix rows",
                expected: y.len(),
                actual: x.nrows(),
            });
        }
        if x.ncols() != layout.num_coefficients() {
            return Err(GlmError::DimensionMismatch {
                context: "design matrix columns",
                expected: layout.num_coefficients(),
                actual: x.ncols(),
            });
        }
        prior.validate(family)?;
        Ok(Self {
            y,
            x,
            family,
            prior,
            layout,
        })
    }
}

impl CpuLogpFunc for GlmLogp<'_> {
    type LogpError = GlmLogpError;

    fn dim(&self) -> usize {
        self.layout.len()
    }

    fn logp(&mut self, position: &[f64], gradient: &mut [f64]) -> std::result::Result<f64, GlmLogpError> {
        let coefs = self.layout.coefficients();
        let aux_slots = self.layout.auxiliary();
        let alpha = position[0];
        let beta = &position[coefs.clone()];
        let mut aux = [0f64; MAX_AUX];
        let aux = &mut aux[..aux_slots.len()];
        for (a, &u) in aux.iter_mut().zip(&position[aux_slots.clone()]) {
            *a = u.exp();
        }

        gradient.fill(0.);
        let mut d_aux = [0f64; MAX_AUX];
        let mut logp = 0f64;
        for (row, &y) in self.x.rows().into_iter().zip(self.y.iter()) {
            let eta = alpha + row.iter().zip(beta).map(|(x, b)| x * b).sum::<f64>();
            let term = self.family.log_likelihood_grad(y, eta, aux);
            logp += term.value;
            gradient[0] += term.d_eta;
            for (g, x) in gradient[coefs.clone()].iter_mut().zip(row.iter()) {
                *g += term.d_eta * x;
            }
            for (d, t) in d_aux.iter_mut().zip(term.d_aux) {
                *d += t;
            }
        }

        logp += self.prior.intercept.ln_pdf(alpha);
        gradient[0] += self.prior.intercept.d_ln_pdf(alpha);
        for (g, &b) in gradient[coefs].iter_mut().zip(beta) {
            logp += self.prior.predictors.ln_pdf(b);
            *g += self.prior.predictors.d_ln_pdf(b);
        }
        for (i, slot) in aux_slots.enumerate() {
            let (_, dist) = &self.prior.auxiliary[i];
            let value = aux[i];
            // log-Jacobian of value = exp(u) is u
            logp += dist.ln_pdf(value) + position[slot];
            gradient[slot] = (d_aux[i] + dist.d_ln_pdf(value)) * value + 1.;
        }

        if !logp.is_finite() || gradient.iter().any(|g| !g.is_finite()) {
            return Err(GlmLogpError::NonFinite);
        }
        Ok(logp)
    }

    fn expanded_names(&self) -> Vec<String> {
        self.layout.display_names().to_vec()
    }

    fn expand_vector(&self, position: &[f64], out: &mut [f64]) {
        out.copy_from_slice(position);
        for slot in self.layout.auxiliary() {
            out[slot] = position[slot].exp();
        }
    }

    fn init_position<R: Rng + ?Sized>(&self, rng: &mut R, position: &mut [f64]) {
        position
            .iter_mut()
            .for_each(|x| *x = rng.random_range(-1f64..1f64));
    }
}
