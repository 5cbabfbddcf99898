use std::error::Error;
use std::fmt::{self, Debug};

use rand::Rng;

use crate::mass_matrix::DiagMassMatrix;
use crate::nuts::{Collector, Direction, NutsError};
use crate::state::State;

/// Errors that happen when we evaluate the logp and gradient function
pub trait LogpError: Error {
    /// Unrecoverable errors during logp computation stop sampling,
    /// recoverable errors are seen as divergences.
    fn is_recoverable(&self) -> bool;
}

/// A log density with gradient, on an unconstrained space.
///
/// Every chain works on its own clone.
pub trait CpuLogpFunc: Clone + Send + Sync {
    type LogpError: Debug + Send + Sync + Error + LogpError + 'static;

    fn dim(&self) -> usize;

    /// Write the gradient into `gradient` and return the log density.
    fn logp(&mut self, position: &[f64], gradient: &mut [f64]) -> Result<f64, Self::LogpError>;

    /// Names of the values written by [`CpuLogpFunc::expand_vector`].
    fn expanded_names(&self) -> Vec<String>;

    /// Map an unconstrained position to the reported parameter values.
    fn expand_vector(&self, position: &[f64], out: &mut [f64]);

    fn init_position<R: Rng + ?Sized>(&self, rng: &mut R, position: &mut [f64]) {
        position
            .iter_mut()
            .for_each(|x| *x = rng.random_range(-2f64..2f64));
    }
}

/// Why a leapfrog step was rejected as divergent.
#[derive(Debug, Clone)]
pub struct DivergenceInfo {
    /// Trajectory index of the point it would have reached.
    pub end_index: i64,
    pub kind: DivergenceKind,
}

#[derive(Debug, Clone)]
pub enum DivergenceKind {
    /// The energy error exceeded `max_energy_error` or was not finite.
    Energy(f64),
    /// The log density raised a recoverable error.
    Logp(String),
}

impl fmt::Display for DivergenceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DivergenceKind::Energy(err) => {
                write!(f, "energy error {err:.3e} at trajectory index {}", self.end_index)
            }
            DivergenceKind::Logp(msg) => {
                write!(f, "log density failed at trajectory index {}: {msg}", self.end_index)
            }
        }
    }
}

/// Hamiltonian with a diagonal euclidean kinetic energy.
pub(crate) struct EuclideanHamiltonian<F: CpuLogpFunc> {
    pub(crate) logp: F,
    pub(crate) mass_matrix: DiagMassMatrix,
    max_energy_error: f64,
    pub(crate) step_size: f64,
}

impl<F: CpuLogpFunc> EuclideanHamiltonian<F> {
    pub(crate) fn new(logp: F, mass_matrix: DiagMassMatrix, max_energy_error: f64, step_size: f64) -> Self {
        EuclideanHamiltonian {
            logp,
            mass_matrix,
            max_energy_error,
            step_size,
        }
    }

    pub(crate) fn dim(&self) -> usize {
        self.logp.dim()
    }

    fn update_potential_gradient(&mut self, state: &mut State) -> Result<(), F::LogpError> {
        let logp = self.logp.logp(&state.q, &mut state.grad)?;
        state.potential_energy = -logp;
        Ok(())
    }

    /// One leapfrog step from `start` in direction `dir`.
    ///
    /// The outer error is fatal, the inner one a divergence.
    pub(crate) fn leapfrog<C: Collector>(
        &mut self,
        start: &State,
        dir: Direction,
        initial_energy: f64,
        collector: &mut C,
    ) -> Result<Result<State, DivergenceInfo>, NutsError> {
        let sign: i64 = match dir {
            Direction::Forward => 1,
            Direction::Backward => -1,
        };
        let epsilon = sign as f64 * self.step_size;
        let mut out = State::new(self.dim());
        out.idx_in_trajectory = start.index_in_trajectory() + sign;

        start.first_momentum_halfstep(&mut out, epsilon);
        self.mass_matrix.update_velocity(&mut out);
        start.position_step(&mut out, epsilon);

        let divergence = match self.update_potential_gradient(&mut out) {
            Err(err) if !err.is_recoverable() => return Err(NutsError::LogpFailure(Box::new(err))),
            Err(err) => Some(DivergenceKind::Logp(err.to_string())),
            Ok(()) => {
                out.second_momentum_halfstep(epsilon);
                self.mass_matrix.update_velocity(&mut out);
                self.mass_matrix.update_kinetic_energy(&mut out);
                start.set_psum(&mut out, dir);

                let energy_error = out.energy() - initial_energy;
                let diverged = !energy_error.is_finite() || energy_error.abs() > self.max_energy_error;
                diverged.then_some(DivergenceKind::Energy(energy_error))
            }
        };

        match divergence {
            Some(kind) => {
                let info = DivergenceInfo {
                    end_index: out.idx_in_trajectory,
                    kind,
                };
                collector.register_leapfrog(start, &out, Some(&info));
                Ok(Err(info))
            }
            None => {
                collector.register_leapfrog(start, &out, None);
                Ok(Ok(out))
            }
        }
    }

    /// Initialize a state at a new location.
    ///
    /// The momentum is left at zero, it is set by `randomize_momentum`.
    pub(crate) fn init_state(&mut self, init: &[f64]) -> Result<State, NutsError> {
        let mut state = State::new(self.dim());
        state.q.copy_from_slice(init);
        if let Err(err) = self.update_potential_gradient(&mut state) {
            if err.is_recoverable() {
                return Err(NutsError::BadInitGrad(err.to_string()));
            }
            return Err(NutsError::LogpFailure(Box::new(err)));
        }
        if !state.grad.iter().all(|g| g.is_finite() && *g != 0.) {
            return Err(NutsError::BadInitGrad(
                "gradient is not finite or exactly zero".to_string(),
            ));
        }
        Ok(state)
    }

    pub(crate) fn randomize_momentum<R: Rng + ?Sized>(&self, state: &mut State, rng: &mut R) {
        self.mass_matrix.randomize_momentum(state, rng);
        self.mass_matrix.update_velocity(state);
        self.mass_matrix.update_kinetic_energy(state);
    }
}
