use rand::distr::{Distribution, StandardUniform};
use rand::Rng;
use thiserror::Error;

use crate::{
    hamiltonian::{CpuLogpFunc, DivergenceInfo, EuclideanHamiltonian},
    math::logaddexp,
    state::State,
};

/// Failures of a single chain.
#[derive(Error, Debug)]
pub enum NutsError {
    /// The log density reported an error that is not recoverable.
    #[error("the log density failed: {0}")]
    LogpFailure(Box<dyn std::error::Error + Send + Sync>),

    #[error("bad initial point: {0}")]
    BadInitGrad(String),
}

pub type Result<T> = std::result::Result<T, NutsError>;

#[derive(Debug, Copy, Clone)]
pub(crate) enum Direction {
    Forward,
    Backward,
}

impl Distribution<Direction> for StandardUniform {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Direction {
        if rng.random::<bool>() {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }
}

/// Observes a transition as it is built, for acceptance statistics and
/// adaptation.
pub(crate) trait Collector {
    fn register_leapfrog(
        &mut self,
        _start: &State,
        _end: &State,
        _divergence_info: Option<&DivergenceInfo>,
    ) {
    }
    fn register_draw(&mut self, _state: &State, _info: &SampleInfo) {}
    fn register_init(&mut self, _state: &State, _options: &NutsOptions) {}
}

/// What happened while building the trajectory of one draw.
#[derive(Debug)]
pub(crate) struct SampleInfo {
    pub depth: u64,
    /// Set when the trajectory ended in a divergence.
    pub divergence_info: Option<DivergenceInfo>,
    /// The trajectory was cut off at the maximum depth instead of turning.
    pub reached_maxdepth: bool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct NutsOptions {
    pub maxdepth: u64,
}

/// A balanced subtree of the trajectory, `2^depth` leapfrog steps long.
struct Subtree {
    /// Leftmost point, the one with the smallest trajectory index.
    /// Backward steps start here.
    left: State,
    right: State,
    /// Point drawn from the subtree by multinomial sampling.
    draw: State,
    /// Log of the summed `exp(-energy error)` weights.
    log_weight: f64,
    depth: u64,
    initial_energy: f64,
    /// Only the root contains the initial point; it samples with a bias
    /// towards the newer half.
    is_root: bool,
}

/// How far a subtree could be grown.
enum Growth {
    Continue(Subtree),
    /// The trajectory turned back on itself or diverged.
    Stop(Subtree, Option<DivergenceInfo>),
}

impl Subtree {
    fn root(state: State) -> Self {
        Self {
            initial_energy: state.energy(),
            left: state.clone(),
            right: state.clone(),
            draw: state,
            log_weight: 0.,
            depth: 0,
            is_root: true,
        }
    }

    /// Double the subtree in `direction`.
    fn extend<F, R, C>(
        mut self,
        rng: &mut R,
        hamiltonian: &mut EuclideanHamiltonian<F>,
        direction: Direction,
        collector: &mut C,
    ) -> Result<Growth>
    where
        F: CpuLogpFunc,
        R: Rng + ?Sized,
        C: Collector,
    {
        let mut other = match self.leaf(hamiltonian, direction, collector)? {
            Ok(leaf) => leaf,
            Err(info) => return Ok(Growth::Stop(self, Some(info))),
        };
        while other.depth < self.depth {
            other = match other.extend(rng, hamiltonian, direction, collector)? {
                Growth::Continue(tree) => tree,
                // a stop inside the new half discards all of it
                Growth::Stop(_, divergence) => return Ok(Growth::Stop(self, divergence)),
            };
        }

        let turning = self.makes_u_turn(&other, direction);
        self.absorb(other, rng, direction);
        Ok(if turning {
            Growth::Stop(self, None)
        } else {
            Growth::Continue(self)
        })
    }

    /// The no-u-turn criterion on the merged tree and across both halves.
    fn makes_u_turn(&self, other: &Subtree, direction: Direction) -> bool {
        let (left, right) = match direction {
            Direction::Forward => (&self.left, &other.right),
            Direction::Backward => (&other.left, &self.right),
        };
        left.is_turning(right)
            || (self.depth > 0
                && (self.right.is_turning(&other.right) || self.left.is_turning(&other.left)))
    }

    fn absorb<R: Rng + ?Sized>(&mut self, other: Subtree, rng: &mut R, direction: Direction) {
        debug_assert_eq!(self.depth, other.depth);
        match direction {
            Direction::Forward => self.right = other.right,
            Direction::Backward => self.left = other.left,
        }
        let total = logaddexp(self.log_weight, other.log_weight);
        let reference = if self.is_root { self.log_weight } else { total };
        let log_accept = other.log_weight - reference;
        if log_accept >= 0. || rng.random_bool(log_accept.exp().clamp(0., 1.)) {
            self.draw = other.draw;
        }
        self.depth += 1;
        self.log_weight = total;
    }

    /// A one-point subtree one leapfrog step beyond the current edge.
    fn leaf<F: CpuLogpFunc, C: Collector>(
        &self,
        hamiltonian: &mut EuclideanHamiltonian<F>,
        direction: Direction,
        collector: &mut C,
    ) -> Result<std::result::Result<Subtree, DivergenceInfo>> {
        let edge = match direction {
            Direction::Forward => &self.right,
            Direction::Backward => &self.left,
        };
        let end = match hamiltonian.leapfrog(edge, direction, self.initial_energy, collector)? {
            Ok(end) => end,
            Err(info) => return Ok(Err(info)),
        };
        Ok(Ok(Subtree {
            log_weight: self.initial_energy - end.energy(),
            left: end.clone(),
            right: end.clone(),
            draw: end,
            depth: 0,
            initial_energy: self.initial_energy,
            is_root: false,
        }))
    }
}

/// One NUTS transition starting at `init`.
pub(crate) fn draw<F, R, C>(
    init: &mut State,
    rng: &mut R,
    hamiltonian: &mut EuclideanHamiltonian<F>,
    options: &NutsOptions,
    collector: &mut C,
) -> Result<(State, SampleInfo)>
where
    F: CpuLogpFunc,
    R: Rng + ?Sized,
    C: Collector,
{
    hamiltonian.randomize_momentum(init, rng);
    init.make_init_point();
    collector.register_init(init, options);

    let mut tree = Subtree::root(init.clone());
    let (tree, divergence_info, reached_maxdepth) = loop {
        if tree.depth >= options.maxdepth {
            break (tree, None, true);
        }
        let direction: Direction = rng.random();
        match tree.extend(rng, hamiltonian, direction, collector)? {
            Growth::Continue(grown) => tree = grown,
            Growth::Stop(grown, divergence) => break (grown, divergence, false),
        }
    };
    let info = SampleInfo {
        depth: tree.depth,
        divergence_info,
        reached_maxdepth,
    };
    collector.register_draw(&tree.draw, &info);
    Ok((tree.draw, info))
}

/// One static HMC transition: `num_steps` leapfrogs in a random
/// direction followed by a Metropolis correction.
pub(crate) fn static_draw<F, R, C>(
    init: &mut State,
    rng: &mut R,
    hamiltonian: &mut EuclideanHamiltonian<F>,
    num_steps: u64,
    options: &NutsOptions,
    collector: &mut C,
) -> Result<(State, SampleInfo)>
where
    F: CpuLogpFunc,
    R: Rng + ?Sized,
    C: Collector,
{
    hamiltonian.randomize_momentum(init, rng);
    init.make_init_point();
    collector.register_init(init, options);
    let initial_energy = init.energy();

    let direction: Direction = rng.random();
    let mut current = init.clone();
    for _ in 0..num_steps {
        current = match hamiltonian.leapfrog(&current, direction, initial_energy, collector)? {
            Ok(next) => next,
            Err(div_info) => {
                let info = SampleInfo {
                    depth: 0,
                    divergence_info: Some(div_info),
                    reached_maxdepth: false,
                };
                collector.register_draw(init, &info);
                return Ok((init.clone(), info));
            }
        };
    }

    let accept_prob = current.log_acceptance_probability(initial_energy).exp();
    let accepted = if rng.random_bool(accept_prob.clamp(0., 1.)) {
        current
    } else {
        init.clone()
    };
    let info = SampleInfo {
        depth: 0,
        divergence_info: None,
        reached_maxdepth: false,
    };
    collector.register_draw(&accepted, &info);
    Ok((accepted, info))
}
