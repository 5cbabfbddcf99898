use anyhow::Result;
use log::debug;
use rand::Rng;

use crate::{
    adapt_strategy::{GlobalStrategy, StrategyCollector},
    hamiltonian::{CpuLogpFunc, EuclideanHamiltonian},
    mass_matrix::DiagMassMatrix,
    nuts::{draw, static_draw, NutsOptions},
    sampler::{SamplerKind, SamplerSettings},
    state::State,
};

/// Diagnostic values reported with every draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawStats {
    pub lp: f64,
    pub n_steps: u64,
    pub acceptance_rate: f64,
    pub tree_depth: u64,
    pub numerical_error: bool,
    pub energy: f64,
    pub energy_error: f64,
    pub step_size: f64,
    pub step_size_bar: f64,
    pub tuning: bool,
    pub reached_maxdepth: bool,
}

/// One Markov chain with its own adaptation state and rng.
pub(crate) struct NutsChain<F: CpuLogpFunc, R: Rng> {
    hamiltonian: EuclideanHamiltonian<F>,
    collector: StrategyCollector,
    strategy: GlobalStrategy,
    options: NutsOptions,
    kind: SamplerKind,
    rng: R,
    state: State,
    num_tune: u64,
    draw_count: u64,
}

impl<F: CpuLogpFunc, R: Rng> NutsChain<F, R> {
    pub(crate) fn new(logp: F, settings: &SamplerSettings, rng: R) -> Self {
        let dim = logp.dim();
        let strategy = GlobalStrategy::new(
            settings.step_size,
            settings.mass_matrix,
            settings.num_tune,
            dim,
        );
        let collector = strategy.new_collector(dim);
        let maxdepth = match settings.sampler {
            SamplerKind::Nuts { maxdepth } => maxdepth,
            SamplerKind::StaticHmc { .. } => 0,
        };
        let hamiltonian = EuclideanHamiltonian::new(
            logp,
            DiagMassMatrix::new(dim),
            settings.max_energy_error,
            settings.step_size.params.initial_step,
        );
        NutsChain {
            hamiltonian,
            collector,
            strategy,
            options: NutsOptions { maxdepth },
            kind: settings.sampler,
            rng,
            state: State::new(dim),
            num_tune: settings.num_tune,
            draw_count: 0,
        }
    }

    pub(crate) fn dim(&self) -> usize {
        self.hamiltonian.dim()
    }

    pub(crate) fn logp_func(&self) -> &F {
        &self.hamiltonian.logp
    }

    /// Initialize the sampler to a position. This should be called
    /// before calling draw.
    ///
    /// This fails if the logp function returns an error.
    pub(crate) fn set_position(&mut self, position: &[f64]) -> Result<()> {
        let state = self.hamiltonian.init_state(position)?;
        self.strategy.init(&mut self.hamiltonian, &state);
        self.state = state;
        Ok(())
    }

    /// Draw a new sample and return the position and some diagnosic information.
    pub(crate) fn draw(&mut self) -> Result<(Box<[f64]>, DrawStats)> {
        let step_size = self.hamiltonian.step_size;
        let (state, info) = match self.kind {
            SamplerKind::Nuts { .. } => draw(
                &mut self.state,
                &mut self.rng,
                &mut self.hamiltonian,
                &self.options,
                &mut self.collector,
            )?,
            SamplerKind::StaticHmc { num_steps } => static_draw(
                &mut self.state,
                &mut self.rng,
                &mut self.hamiltonian,
                num_steps,
                &self.options,
                &mut self.collector,
            )?,
        };
        // after `draw` the old state carries the resampled momentum
        let initial_energy = self.state.energy();
        self.state = state;

        self.strategy
            .adapt(&mut self.hamiltonian, self.draw_count, &self.collector);

        let tuning = self.draw_count < self.num_tune;
        if let (Some(divergence), false) = (&info.divergence_info, tuning) {
            debug!("divergent transition at draw {}: {divergence}", self.draw_count);
        }
        let stats = DrawStats {
            lp: -self.state.potential_energy,
            n_steps: self.collector.accept.steps(),
            acceptance_rate: self.collector.accept.mean(),
            tree_depth: info.depth,
            numerical_error: info.divergence_info.is_some(),
            energy: self.state.energy(),
            energy_error: self.state.energy() - initial_energy,
            step_size,
            step_size_bar: self.strategy.step_size_bar(),
            tuning,
            reached_maxdepth: info.reached_maxdepth,
        };
        self.draw_count += 1;
        Ok((self.state.q.clone(), stats))
    }
}


#[cfg(test)]
mod tests {
    use super::test_logps::NormalLogp;
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{rngs::StdRng, SeedableRng};

    fn run(settings: &SamplerSettings, draws: usize) -> (Vec<f64>, Vec<DrawStats>) {
        let mut chain = NutsChain::new(NormalLogp::new(3, 3.), settings, StdRng::seed_from_u64(42));
        chain.set_position(&[1.5, 1.5, 1.5]).unwrap();
        let mut first = Vec::new();
        let mut stats = Vec::new();
        for _ in 0..draws {
            let (position, stat) = chain.draw().unwrap();
            first.push(position[0]);
            stats.push(stat);
        }
        (first, stats)
    }

    #[test]
    fn nuts_recovers_normal_mean() {
        let settings = SamplerSettings {
            num_tune: 300,
            ..Default::default()
        };
        let (draws, stats) = run(&settings, 1300);
        let kept = &draws[300..];
        let mean = kept.iter().sum::<f64>() / kept.len() as f64;
        assert_abs_diff_eq!(mean, 3., epsilon = 0.2);
        assert!(stats[..300].iter().all(|s| s.tuning));
        assert!(stats[300..].iter().all(|s| !s.tuning));
        let final_step = stats[300].step_size;
        assert!(stats[300..].iter().all(|s| s.step_size == final_step));
        assert!(stats[300..].iter().all(|s| !s.numerical_error));
    }

    #[test]
    fn static_hmc_recovers_normal_mean() {
        let settings = SamplerSettings {
            num_tune: 300,
            sampler: SamplerKind::StaticHmc { num_steps: 8 },
            ..Default::default()
        };
        let (draws, stats) = run(&settings, 2300);
        let kept = &draws[300..];
        let mean = kept.iter().sum::<f64>() / kept.len() as f64;
        assert_abs_diff_eq!(mean, 3., epsilon = 0.25);
        assert!(stats
            .iter()
            .filter(|s| !s.numerical_error)
            .all(|s| s.n_steps == 8));
    }
}
