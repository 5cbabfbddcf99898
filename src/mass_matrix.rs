use itertools::izip;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::{
    math::{multiply, vector_dot},
    nuts::{Collector, SampleInfo},
    state::State,
};

const MIN_SCALE: f64 = 1e-10;
const MAX_SCALE: f64 = 1e10;

/// Inverse mass matrix `M^-1 = diag(variance)`.
#[derive(Debug, Clone)]
pub(crate) struct DiagMassMatrix {
    inv_std: Box<[f64]>,
    pub(crate) variance: Box<[f64]>,
}

impl DiagMassMatrix {
    pub(crate) fn new(dim: usize) -> Self {
        Self {
            inv_std: vec![1.; dim].into(),
            variance: vec![1.; dim].into(),
        }
    }

    /// Replace the diagonal; values must be finite and positive.
    pub(crate) fn update_diag(&mut self, new_variance: impl Iterator<Item = f64>) {
        for (var, inv_std, value) in izip!(self.variance.iter_mut(), self.inv_std.iter_mut(), new_variance) {
            debug_assert!(value.is_finite() && value > 0., "illegal mass matrix value {value}");
            *var = value;
            *inv_std = value.sqrt().recip();
        }
    }

    pub(crate) fn update_velocity(&self, state: &mut State) {
        multiply(&self.variance, &state.p, &mut state.v);
    }

    pub(crate) fn update_kinetic_energy(&self, state: &mut State) {
        state.kinetic_energy = 0.5 * vector_dot(&state.p, &state.v);
    }

    /// Draw `p ~ N(0, M)`.
    pub(crate) fn randomize_momentum<R: Rng + ?Sized>(&self, state: &mut State, rng: &mut R) {
        for (p, &scale) in state.p.iter_mut().zip(self.inv_std.iter()) {
            *p = scale * rng.sample::<f64, _>(StandardNormal);
        }
    }
}

/// Exponentially weighted elementwise mean and variance.
#[derive(Debug)]
pub(crate) struct RunningVariance {
    mean: Box<[f64]>,
    variance: Box<[f64]>,
    count: u64,
    decay: f64,
}

impl RunningVariance {
    pub(crate) fn new(dim: usize, decay: f64) -> Self {
        Self {
            mean: vec![0.; dim].into(),
            variance: vec![0.; dim].into(),
            count: 0,
            decay,
        }
    }

    pub(crate) fn reset_mean(&mut self, values: impl Iterator<Item = f64>) {
        self.mean.iter_mut().zip(values).for_each(|(m, v)| *m = v);
    }

    pub(crate) fn fill_variance(&mut self, values: impl Iterator<Item = f64>) {
        self.variance.iter_mut().zip(values).for_each(|(s, v)| *s = v);
    }

    pub(crate) fn push(&mut self, values: impl Iterator<Item = f64>) {
        let decay = self.decay;
        for (x, mean, var) in izip!(values, self.mean.iter_mut(), self.variance.iter_mut()) {
            let delta = x - *mean;
            *mean += decay * delta;
            *var = (1. - decay) * (*var + decay * delta * delta);
        }
        self.count += 1;
    }

    pub(crate) fn variance(&self) -> &[f64] {
        &self.variance
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }
}

/// Variances of positions and gradients over the same draws.
///
/// For a Gaussian target `sqrt(var(draw) / var(grad))` is the exact
/// posterior variance, which makes the ratio a robust mass matrix estimate.
#[derive(Debug)]
pub(crate) struct VariancePair {
    pub(crate) draw: RunningVariance,
    pub(crate) grad: RunningVariance,
}

impl VariancePair {
    pub(crate) fn new(dim: usize, decay: f64) -> Self {
        Self {
            draw: RunningVariance::new(dim, decay),
            grad: RunningVariance::new(dim, decay),
        }
    }

    pub(crate) fn push(&mut self, sample: &DrawGradCollector) {
        self.draw.push(sample.draw.iter().copied());
        self.grad.push(sample.grad.iter().copied());
    }

    /// Start a fresh window centered on `sample`.
    pub(crate) fn center_on(&mut self, sample: &DrawGradCollector) {
        self.draw.reset_mean(sample.draw.iter().copied());
        self.grad.reset_mean(sample.grad.iter().copied());
    }

    pub(crate) fn count(&self) -> u64 {
        debug_assert_eq!(self.draw.count(), self.grad.count());
        self.draw.count()
    }

    /// The mass matrix diagonal, clamped to a sane range.
    pub(crate) fn diagonal(&self) -> impl Iterator<Item = f64> + '_ {
        self.draw
            .variance()
            .iter()
            .zip(self.grad.variance())
            .map(|(&draw, &grad)| {
                let scale = (draw / grad).sqrt().clamp(MIN_SCALE, MAX_SCALE);
                if scale.is_finite() {
                    scale
                } else {
                    1.
                }
            })
    }
}

/// Settings for mass matrix adaptation
#[derive(Debug, Clone, Copy)]
pub struct DiagAdaptExpSettings {
    /// Weight of a new draw in the variance estimate.
    pub variance_decay: f64,
    /// The same weight during the first window.
    pub early_variance_decay: f64,
    /// Stop adaptation `final_window` draws before tuning ends.
    pub final_window: u64,
    /// Switch to a new variance estimator every `window_switch_freq` draws.
    pub window_switch_freq: u64,
    /// Size of the first window, before the regular switching starts.
    pub early_window_switch_freq: u64,
    /// Initialize the diagonal from the gradient at the initial point.
    pub grad_init: bool,
}

impl Default for DiagAdaptExpSettings {
    fn default() -> Self {
        Self {
            variance_decay: 0.02,
            early_variance_decay: 0.1,
            final_window: 50,
            window_switch_freq: 50,
            early_window_switch_freq: 10,
            grad_init: true,
        }
    }
}

/// Position and gradient of the last draw.
pub(crate) struct DrawGradCollector {
    pub(crate) draw: Box<[f64]>,
    pub(crate) grad: Box<[f64]>,
    /// Draws that barely left the starting point say little about the scale.
    pub(crate) is_good: bool,
}

impl DrawGradCollector {
    pub(crate) fn new(dim: usize) -> Self {
        Self {
            draw: vec![0.; dim].into(),
            grad: vec![0.; dim].into(),
            is_good: true,
        }
    }
}

impl Collector for DrawGradCollector {
    fn register_draw(&mut self, state: &State, info: &SampleInfo) {
        self.draw.copy_from_slice(&state.q);
        self.grad.copy_from_slice(&state.grad);
        let idx = state.index_in_trajectory();
        self.is_good = match info.divergence_info {
            Some(_) => idx.abs() >= 4,
            None => idx != 0,
        };
    }
}
