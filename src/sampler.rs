use anyhow::{bail, Context, Result};
use log::{debug, info};
use ndarray::{Array2, Array3, Axis};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::{
    chain::{DrawStats, NutsChain},
    diagnostics::{self, ParameterSummary},
    draws::Draws,
    hamiltonian::CpuLogpFunc,
    mass_matrix::DiagAdaptExpSettings,
    nuts::NutsError,
    stepsize::DualAverageSettings,
};

/// Names of the per-draw sampler statistics stored next to the parameters.
pub const INTERNAL_NAMES: [&str; 9] = [
    "lp",
    "n_steps",
    "acceptance_rate",
    "tree_depth",
    "numerical_error",
    "energy",
    "energy_error",
    "step_size",
    "step_size_bar",
];

const MAX_INIT_TRIES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerKind {
    /// The No-U-Turn Sampler. A trajectory has fewer than `2 ^ maxdepth` leapfrog steps.
    Nuts { maxdepth: u64 },
    /// Hamiltonian Monte Carlo with a fixed number of leapfrog steps.
    StaticHmc { num_steps: u64 },
}

impl Default for SamplerKind {
    fn default() -> Self {
        SamplerKind::Nuts { maxdepth: 10 }
    }
}

/// How chains are distributed over threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parallelization {
    /// One rayon task per chain.
    #[default]
    Threads,
    Serial,
}

/// Settings for the sampler
#[derive(Debug, Clone, Copy)]
pub struct SamplerSettings {
    pub sampler: SamplerKind,
    pub parallelization: Parallelization,
    /// The number of draws per chain after tuning
    pub num_draws: u64,
    pub num_chains: usize,
    /// The number of tuning steps, where we fit the step size and mass matrix.
    pub num_tune: u64,
    /// A random seed is chosen when this is `None`.
    pub seed: Option<u64>,
    /// Suppress the per-chain summaries and convergence notes.
    pub quiet: bool,
    /// If the energy error is larger than this threshold we treat the leapfrog
    /// step as a divergence.
    pub max_energy_error: f64,
    pub step_size: DualAverageSettings,
    pub mass_matrix: DiagAdaptExpSettings,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            sampler: SamplerKind::default(),
            parallelization: Parallelization::default(),
            num_draws: 2000,
            num_chains: 4,
            num_tune: 1000,
            seed: None,
            quiet: false,
            max_energy_error: 1000f64,
            step_size: DualAverageSettings::default(),
            mass_matrix: DiagAdaptExpSettings::default(),
        }
    }
}

impl SamplerSettings {
    fn validate(&self) -> Result<()> {
        if self.num_chains == 0 {
            bail!("at least one chain is required");
        }
        match self.sampler {
            SamplerKind::Nuts { maxdepth: 0 } => bail!("maxdepth must be positive"),
            SamplerKind::StaticHmc { num_steps: 0 } => bail!("num_steps must be positive"),
            _ => {}
        }
        if self.mass_matrix.window_switch_freq == 0 {
            bail!("window_switch_freq must be positive");
        }
        let step = self.step_size.params.initial_step;
        if !(step.is_finite() && step > 0.) {
            bail!("initial step size must be positive, got {step}");
        }
        Ok(())
    }
}

/// Post-tuning draws of all chains.
///
/// `draws` holds the parameters followed by the sampler internals,
/// `parameters` and `internals` name the two groups.
#[derive(Debug, Clone)]
pub struct Trace {
    pub draws: Draws,
    pub parameters: Vec<String>,
    pub internals: Vec<String>,
}

/// An MCMC engine that can sample from a log density.
pub trait McmcEngine {
    fn sample<F: CpuLogpFunc>(&self, logp: &F, settings: &SamplerSettings) -> Result<Trace>;

    /// Convergence summary of the named quantities.
    fn summarize(&self, draws: &Draws, names: &[String]) -> crate::Result<Vec<ParameterSummary>> {
        diagnostics::summarize(draws, names)
    }
}

/// The default engine: NUTS or static HMC with step size and diagonal
/// mass matrix adaptation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NutsEngine;

struct ChainOutput {
    values: Array2<f64>,
    stats: Vec<DrawStats>,
}

fn internal_values(stats: &DrawStats) -> [f64; 9] {
    [
        stats.lp,
        stats.n_steps as f64,
        stats.acceptance_rate,
        stats.tree_depth as f64,
        if stats.numerical_error { 1. } else { 0. },
        stats.energy,
        stats.energy_error,
        stats.step_size,
        stats.step_size_bar,
    ]
}

fn sample_chain<F: CpuLogpFunc>(
    logp: F,
    settings: &SamplerSettings,
    seed: u64,
    chain_id: u64,
) -> Result<ChainOutput> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(chain_id);
    let chain_rng = SmallRng::from_rng(&mut rng);

    let names = logp.expanded_names();
    let mut sampler = NutsChain::new(logp, settings, chain_rng);
    let dim = sampler.dim();

    let mut initval = vec![0f64; dim];
    let mut error = None;
    for attempt in 0..MAX_INIT_TRIES {
        sampler.logp_func().init_position(&mut rng, &mut initval);
        match sampler.set_position(&initval) {
            Ok(()) => {
                error = None;
                break;
            }
            Err(err) => {
                if let Some(NutsError::LogpFailure(_)) = err.downcast_ref::<NutsError>() {
                    return Err(err.context("Failed to evaluate the initial point"));
                }
                debug!("chain {chain_id}: initial point {attempt} rejected: {err:#}");
                error = Some(err);
            }
        }
    }
    if let Some(error) = error {
        return Err(error.context(format!(
            "All {MAX_INIT_TRIES} initialization points failed for chain {chain_id}"
        )));
    }

    let width = names.len() + INTERNAL_NAMES.len();
    let mut values = Array2::zeros((settings.num_draws as usize, width));
    let mut stats = Vec::with_capacity(settings.num_draws as usize);
    let mut expanded = vec![0f64; names.len()];

    let mut tuning_divergences = 0;
    let mut rows = values.axis_iter_mut(Axis(0));
    for i in 0..settings.num_tune + settings.num_draws {
        let (position, stat) = sampler
            .draw()
            .with_context(|| format!("Sampling failed at draw {i} in chain {chain_id}"))?;
        if stat.tuning {
            tuning_divergences += usize::from(stat.numerical_error);
            continue;
        }
        let Some(mut row) = rows.next() else {
            bail!("chain {chain_id} produced more draws than requested");
        };
        sampler.logp_func().expand_vector(&position, &mut expanded);
        row.iter_mut()
            .zip(expanded.iter().chain(internal_values(&stat).iter()))
            .for_each(|(out, &val)| *out = val);
        stats.push(stat);
    }
    drop(rows);
    debug!("chain {chain_id}: {tuning_divergences} divergences during tuning");
    Ok(ChainOutput { values, stats })
}

fn log_chain_summary(chain: usize, output: &ChainOutput) {
    let n = output.stats.len().max(1) as f64;
    let divergences = output.stats.iter().filter(|s| s.numerical_error).count();
    let maxdepth = output.stats.iter().filter(|s| s.reached_maxdepth).count();
    let accept = output.stats.iter().map(|s| s.acceptance_rate).sum::<f64>() / n;
    let depth = output.stats.iter().map(|s| s.tree_depth as f64).sum::<f64>() / n;
    let step = output.stats.last().map_or(f64::NAN, |s| s.step_size);
    info!(
        "chain {chain}: {} draws, {divergences} divergences, {maxdepth} at max depth, \
         mean acceptance {accept:.3}, mean tree depth {depth:.2}, step size {step:.3}",
        output.stats.len()
    );
}

impl McmcEngine for NutsEngine {
    fn sample<F: CpuLogpFunc>(&self, logp: &F, settings: &SamplerSettings) -> Result<Trace> {
        settings.validate()?;
        let seed = settings.seed.unwrap_or_else(|| rand::rng().random());
        let run = |chain: usize| sample_chain(logp.clone(), settings, seed, chain as u64);

        let outputs = match settings.parallelization {
            Parallelization::Threads => (0..settings.num_chains)
                .into_par_iter()
                .map(run)
                .collect::<Result<Vec<_>>>()?,
            Parallelization::Serial => (0..settings.num_chains)
                .map(run)
                .collect::<Result<Vec<_>>>()?,
        };

        let parameters = logp.expanded_names();
        let internals: Vec<String> = INTERNAL_NAMES.iter().map(|s| s.to_string()).collect();
        let width = parameters.len() + internals.len();
        let mut values = Array3::zeros((settings.num_draws as usize, width, settings.num_chains));
        for (chain, output) in outputs.iter().enumerate() {
            if !settings.quiet {
                log_chain_summary(chain, output);
            }
            values.index_axis_mut(Axis(2), chain).assign(&output.values);
        }

        let labels = parameters.iter().chain(&internals).cloned().collect();
        let draws = Draws::new(values, labels)?;
        Ok(Trace {
            draws,
            parameters,
            internals,
        })
    }
}
