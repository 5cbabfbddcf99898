use std::iter;
use std::mem;

use crate::{
    hamiltonian::{CpuLogpFunc, DivergenceInfo, EuclideanHamiltonian},
    mass_matrix::{DiagAdaptExpSettings, DrawGradCollector, VariancePair},
    nuts::{Collector, NutsOptions, SampleInfo},
    state::State,
    stepsize::{AcceptanceCollector, DualAverage, DualAverageSettings},
};

/// Diagonal mass matrix adaptation in overlapping windows.
///
/// The foreground estimate sets the mass matrix. The background one
/// collects the same draws and replaces it at every window switch, so old
/// draws from far out in the tails are forgotten.
pub(crate) struct ExpWindowDiagAdapt {
    dim: usize,
    /// Last draw that still updates the estimates.
    adapt_until: u64,
    foreground: VariancePair,
    background: VariancePair,
    settings: DiagAdaptExpSettings,
}

impl ExpWindowDiagAdapt {
    pub(crate) fn new(settings: DiagAdaptExpSettings, num_tune: u64, dim: usize) -> Self {
        let early = settings.early_variance_decay;
        Self {
            dim,
            adapt_until: num_tune.saturating_sub(settings.final_window),
            foreground: VariancePair::new(dim, early),
            background: VariancePair::new(dim, early),
            settings,
        }
    }

    fn init<F: CpuLogpFunc>(&mut self, hamiltonian: &mut EuclideanHamiltonian<F>, state: &State) {
        let grad_init = self.settings.grad_init;
        self.foreground.draw.fill_variance(iter::repeat(1.));
        self.foreground.draw.reset_mean(state.q.iter().copied());
        self.foreground.grad.fill_variance(state.grad.iter().map(|&g| {
            let var = if grad_init { g * g } else { 1. };
            if var == 0. || !var.is_finite() {
                1.
            } else {
                var
            }
        }));
        self.foreground.grad.reset_mean(iter::repeat(0.));
        hamiltonian.mass_matrix.update_diag(self.foreground.diagonal());
    }

    /// Returns true if the estimators were switched.
    fn adapt<F: CpuLogpFunc>(
        &mut self,
        hamiltonian: &mut EuclideanHamiltonian<F>,
        draw: u64,
        sample: &DrawGradCollector,
    ) -> bool {
        if draw >= self.adapt_until {
            return false;
        }

        let settings = &self.settings;
        let collected = self.background.count();
        let early_switch =
            collected == settings.early_window_switch_freq && draw < settings.window_switch_freq;
        let switch = early_switch || (draw % settings.window_switch_freq == 0 && collected > 5);

        if switch {
            let fresh = VariancePair::new(self.dim, settings.variance_decay);
            self.foreground = mem::replace(&mut self.background, fresh);
            self.background.center_on(sample);
        } else if sample.is_good {
            self.foreground.push(sample);
            self.background.push(sample);
        }

        if self.foreground.count() > 2
            && (settings.grad_init || draw > settings.window_switch_freq)
        {
            hamiltonian.mass_matrix.update_diag(self.foreground.diagonal());
        }
        switch
    }
}

/// Step size and mass matrix adaptation run together during tuning.
pub(crate) struct GlobalStrategy {
    step_size: DualAverage,
    step_size_settings: DualAverageSettings,
    mass_matrix: ExpWindowDiagAdapt,
    num_tune: u64,
    num_early: u64,
}

impl GlobalStrategy {
    pub(crate) fn new(
        step_size_settings: DualAverageSettings,
        mass_matrix_settings: DiagAdaptExpSettings,
        num_tune: u64,
        dim: usize,
    ) -> Self {
        Self {
            step_size: DualAverage::new(step_size_settings.params),
            num_early: ((num_tune as f64) * step_size_settings.final_window_ratio).ceil() as u64,
            step_size_settings,
            mass_matrix: ExpWindowDiagAdapt::new(mass_matrix_settings, num_tune, dim),
            num_tune,
        }
    }

    pub(crate) fn init<F: CpuLogpFunc>(
        &mut self,
        hamiltonian: &mut EuclideanHamiltonian<F>,
        state: &State,
    ) {
        hamiltonian.step_size = self.step_size_settings.params.initial_step;
        self.mass_matrix.init(hamiltonian, state);
    }

    fn target_accept(&self, draw: u64) -> f64 {
        if draw >= self.num_early {
            self.step_size_settings.target_accept
        } else {
            let start = self.step_size_settings.early_target_accept;
            let end = self.step_size_settings.target_accept;
            let time = (draw as f64) / (self.num_early as f64);
            start + (end - start) * (1f64 + (6f64 * (time - 0.6)).tanh()) / 2f64
        }
    }

    pub(crate) fn adapt<F: CpuLogpFunc>(
        &mut self,
        hamiltonian: &mut EuclideanHamiltonian<F>,
        draw: u64,
        collector: &StrategyCollector,
    ) {
        let switched = self
            .mass_matrix
            .adapt(hamiltonian, draw, &collector.draw_grad);

        if draw + 1 >= self.num_tune {
            hamiltonian.step_size = self.step_size.final_step_size();
            return;
        }
        if switched {
            let current = self.step_size.final_step_size();
            self.step_size.restart(current, 10.);
        }
        let target = self.target_accept(draw);
        self.step_size.update(collector.accept.mean(), target);
        hamiltonian.step_size = self.step_size.step_size();
    }

    pub(crate) fn step_size_bar(&self) -> f64 {
        self.step_size.final_step_size()
    }

    pub(crate) fn new_collector(&self, dim: usize) -> StrategyCollector {
        StrategyCollector {
            accept: AcceptanceCollector::new(),
            draw_grad: DrawGradCollector::new(dim),
        }
    }
}

pub(crate) struct StrategyCollector {
    pub(crate) accept: AcceptanceCollector,
    pub(crate) draw_grad: DrawGradCollector,
}

impl Collector for StrategyCollector {
    fn register_leapfrog(
        &mut self,
        start: &State,
        end: &State,
        divergence_info: Option<&DivergenceInfo>,
    ) {
        self.accept.register_leapfrog(start, end, divergence_info);
        self.draw_grad.register_leapfrog(start, end, divergence_info);
    }

    fn register_draw(&mut self, state: &State, info: &SampleInfo) {
        self.accept.register_draw(state, info);
        self.draw_grad.register_draw(state, info);
    }

    fn register_init(&mut self, state: &State, options: &NutsOptions) {
        self.accept.register_init(state, options);
        self.draw_grad.register_init(state, options);
    }
}
