use crate::{
    hamiltonian::DivergenceInfo,
    nuts::{Collector, NutsOptions},
    state::State,
};

/// Constants of the dual averaging update (Hoffman & Gelman 2014, §3.2).
#[derive(Debug, Clone, Copy)]
pub struct DualAverageOptions {
    /// Decay exponent of the averaged iterate.
    pub k: f64,
    /// Damping of the first iterations.
    pub t0: f64,
    /// Shrinkage towards `10 * initial_step`.
    pub gamma: f64,
    pub initial_step: f64,
}

impl Default for DualAverageOptions {
    fn default() -> Self {
        Self {
            k: 0.75,
            t0: 10.,
            gamma: 0.05,
            initial_step: 0.1,
        }
    }
}

/// Settings for step size adaptation
#[derive(Debug, Clone, Copy)]
pub struct DualAverageSettings {
    /// Target acceptance rate at the start of tuning
    pub early_target_accept: f64,
    pub target_accept: f64,
    /// Fraction of tuning over which the target moves to `target_accept`.
    pub final_window_ratio: f64,
    pub params: DualAverageOptions,
}

impl Default for DualAverageSettings {
    fn default() -> Self {
        Self {
            early_target_accept: 0.5,
            target_accept: 0.8,
            final_window_ratio: 0.4,
            params: DualAverageOptions::default(),
        }
    }
}

/// Step size search by stochastic optimization of the acceptance rate.
#[derive(Debug, Clone)]
pub(crate) struct DualAverage {
    log_eps: f64,
    log_eps_bar: f64,
    error_sum: f64,
    shrink_point: f64,
    iteration: u64,
    options: DualAverageOptions,
}

impl DualAverage {
    pub(crate) fn new(options: DualAverageOptions) -> Self {
        let mut adapt = Self {
            log_eps: 0.,
            log_eps_bar: 0.,
            error_sum: 0.,
            shrink_point: 0.,
            iteration: 1,
            options,
        };
        adapt.restart(options.initial_step, 10.);
        adapt
    }

    /// Move the step size so that the acceptance rate approaches `target`.
    pub(crate) fn update(&mut self, accept_rate: f64, target: f64) {
        let opts = &self.options;
        let t = self.iteration as f64;
        let weight = (t + opts.t0).recip();
        self.error_sum += weight * (target - accept_rate - self.error_sum);
        self.log_eps = self.shrink_point - t.sqrt() / opts.gamma * self.error_sum;
        let eta = t.powf(-opts.k);
        self.log_eps_bar += eta * (self.log_eps - self.log_eps_bar);
        self.iteration += 1;
    }

    /// The step size of the next trajectory.
    pub(crate) fn step_size(&self) -> f64 {
        self.log_eps.exp()
    }

    /// The averaged step size, used once tuning ends.
    pub(crate) fn final_step_size(&self) -> f64 {
        self.log_eps_bar.exp()
    }

    /// Forget the history and start again from `step`, shrinking towards
    /// `bias * step`.
    pub(crate) fn restart(&mut self, step: f64, bias: f64) {
        self.log_eps = step.ln();
        self.log_eps_bar = self.log_eps;
        self.error_sum = 0.;
        self.shrink_point = (bias * step).ln();
        self.iteration = 1;
    }
}

/// Mean acceptance probability over the leapfrog steps of one trajectory.
pub(crate) struct AcceptanceCollector {
    initial_energy: f64,
    sum: f64,
    steps: u64,
}

impl AcceptanceCollector {
    pub(crate) fn new() -> Self {
        Self {
            initial_energy: 0.,
            sum: 0.,
            steps: 0,
        }
    }

    /// NaN before the first leapfrog step.
    pub(crate) fn mean(&self) -> f64 {
        self.sum / self.steps as f64
    }

    pub(crate) fn steps(&self) -> u64 {
        self.steps
    }
}

impl Collector for AcceptanceCollector {
    fn register_leapfrog(
        &mut self,
        _start: &State,
        end: &State,
        divergence_info: Option<&DivergenceInfo>,
    ) {
        if divergence_info.is_none() {
            self.sum += end.log_acceptance_probability(self.initial_energy).exp();
        }
        self.steps += 1;
    }

    fn register_init(&mut self, state: &State, _options: &NutsOptions) {
        self.initial_energy = state.energy();
        self.sum = 0.;
        self.steps = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn step_size_follows_acceptance() {
        let mut adapt = DualAverage::new(DualAverageOptions::default());
        assert_relative_eq!(adapt.step_size(), 0.1, max_relative = 1e-12);
        // always accepting means the step is too small
        for _ in 0..20 {
            adapt.update(1., 0.8);
        }
        assert!(adapt.step_size() > 0.1);
        assert!(adapt.final_step_size() > 0.1);

        adapt.restart(1., 10.);
        assert_relative_eq!(adapt.final_step_size(), 1., max_relative = 1e-12);
        for _ in 0..20 {
            adapt.update(0., 0.8);
        }
        assert!(adapt.step_size() < 1.);
    }

    #[test]
    fn matching_target_settles() {
        let mut adapt = DualAverage::new(DualAverageOptions::default());
        for _ in 0..500 {
            adapt.update(0.8, 0.8);
        }
        // no error means the iterate sits at the shrinkage point
        assert_relative_eq!(adapt.step_size(), 1., max_relative = 1e-9);
    }
}
